//! MXR relay router — forwards data frames between registered agents.
//!
//! The router never interprets payload bytes: after the registration
//! handshake it moves whole frames between connections purely by agent id.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI argument parsing and router configuration.
pub mod config;
mod connection;
/// Error types for router operations.
pub mod error;
/// Accept loop and shared router state.
pub mod server;
/// AgentID-keyed connection table used for forwarding.
pub mod table;

pub use server::{run, run_with_shutdown, RouterState};
