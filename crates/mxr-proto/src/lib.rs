//! Wire protocol shared by the MXR router and agents.
//!
//! This crate provides:
//! - Binary message serialization and parsing ([`message`])
//! - Length-prefixed stream framing for tokio transports ([`codec`])
//! - Identity types and protocol constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod message;
pub mod types;

pub use codec::{CodecError, MessageCodec};
pub use message::{Message, MessageError, MessageKind};
pub use types::{AgentID, DeliveryStatus, MagicCookie, RegistrationStatus};
