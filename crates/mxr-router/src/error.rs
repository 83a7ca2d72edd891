use mxr_proto::{CodecError, MessageKind, RegistrationStatus};
use thiserror::Error;

/// Errors that can occur while serving one agent connection.
#[derive(Error, Debug)]
pub enum RouterError {
    /// The registration handshake was rejected.
    #[error("registration rejected: {0}")]
    Registration(RegistrationStatus),
    /// The first frame on the connection was not a RegistrationRequest,
    /// or a registration frame arrived after the handshake.
    #[error("unexpected {0} frame")]
    UnexpectedFrame(MessageKind),
    /// No RegistrationRequest arrived within the configured window.
    #[error("registration timed out")]
    RegistrationTimeout,
    /// The connection was closed by the remote peer.
    #[error("connection closed")]
    ConnectionClosed,
    /// Frame encoding or decoding error; the stream can no longer be
    /// trusted to be in sync.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
