use mxr_proto::{CodecError, DeliveryStatus, MessageKind, RegistrationStatus};
use thiserror::Error;

/// Errors surfaced by the agent API.
#[derive(Error, Debug)]
pub enum AgentError {
    /// The configuration failed validation.
    #[error("configuration error: {0}")]
    Config(String),
    /// The router rejected this agent's registration.
    #[error("registration rejected: {0}")]
    Registration(RegistrationStatus),
    /// The router sent a frame that is not valid at this point of the
    /// conversation.
    #[error("unexpected {0} frame")]
    UnexpectedFrame(MessageKind),
    /// The connection to the router died while a request was in flight.
    #[error("connection to the router lost")]
    ConnectionLost,
    /// No reply arrived within the send timeout.
    #[error("request timed out")]
    Timeout,
    /// The router could not deliver the request to its recipient.
    #[error("recipient unreachable: {0}")]
    Unroutable(DeliveryStatus),
    /// The agent was shut down while the request was queued or in flight.
    #[error("agent is shut down")]
    ShutDown,
    /// Frame encoding or decoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
