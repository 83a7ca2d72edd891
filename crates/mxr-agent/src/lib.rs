//! MXR agent library — the client side of the relay protocol.
//!
//! An [`Agent`] registers with a router under a stable [`AgentID`] and then
//! exchanges request/reply payloads with other agents by id alone, letting
//! NAT-bound or firewalled processes accept inbound requests through their
//! single outbound connection.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod agent;
/// Exponential backoff used between reconnection attempts.
pub mod backoff;
/// Agent configuration and validation.
pub mod config;
mod connection;
/// Pluggable transport trait and the plain TCP connector.
pub mod connector;
/// Inbound request handler trait.
pub mod dispatch;
/// Error types for agent operations.
pub mod error;
mod pending;
/// Per-agent message id sequence.
pub mod sequence;

pub use agent::Agent;
pub use config::{AgentConfig, ReconnectConfig};
pub use connection::AgentStatus;
pub use connector::{Connector, TcpConnector};
pub use dispatch::Dispatcher;
pub use error::AgentError;
pub use mxr_proto::AgentID;
pub use sequence::MessageIdSequence;
