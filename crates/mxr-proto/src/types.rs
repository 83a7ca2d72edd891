//! Identity types and protocol constants.

use rand::Rng;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Wire protocol identifier carried in every frame header.
/// Bump this on breaking wire-format changes.
pub const PROTOCOL_ID: u32 = 2;

/// URI scheme used when rendering agent addresses.
pub const URI_SCHEME: &str = "mxr";

/// Size of a [`MagicCookie`] in bytes.
pub const COOKIE_SIZE: usize = 32;

/// Router-assigned identity of one agent connection.
///
/// Unique for the lifetime of a router session. An `AgentID` names one
/// endpoint for forwarding; it carries no other meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentID(u64);

impl AgentID {
    /// Wraps a raw identifier value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Renders an addressable URI of the form `mxr://<id>/<path>`.
    ///
    /// # Examples
    ///
    /// ```
    /// use mxr_proto::AgentID;
    /// assert_eq!(AgentID::new(7).uri("registry"), "mxr://7/registry");
    /// ```
    #[must_use]
    pub fn uri(self, path: &str) -> String {
        format!("{}://{}/{}", URI_SCHEME, self.0, path.trim_start_matches('/'))
    }
}

impl fmt::Display for AgentID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for AgentID {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Errors constructing a [`MagicCookie`] from external input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CookieError {
    /// The supplied value does not fit in [`COOKIE_SIZE`] bytes.
    #[error("cookie too long: max {COOKIE_SIZE} bytes, got {0}")]
    TooLong(usize),
    /// The supplied value is empty.
    #[error("cookie must not be empty")]
    Empty,
}

/// Shared-secret token proving the right to claim or reclaim an [`AgentID`].
///
/// Compared by equality at registration. Values shorter than
/// [`COOKIE_SIZE`] are zero-padded, so `"secret"` always names the same
/// cookie.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MagicCookie([u8; COOKIE_SIZE]);

impl MagicCookie {
    /// Generates a fresh random cookie.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; COOKIE_SIZE];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes)
    }

    /// Wraps an exact [`COOKIE_SIZE`]-byte value.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; COOKIE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw cookie bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; COOKIE_SIZE] {
        &self.0
    }
}

impl FromStr for MagicCookie {
    type Err = CookieError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.as_bytes();
        if raw.is_empty() {
            return Err(CookieError::Empty);
        }
        if raw.len() > COOKIE_SIZE {
            return Err(CookieError::TooLong(raw.len()));
        }
        let mut bytes = [0u8; COOKIE_SIZE];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self(bytes))
    }
}

// Keep the secret out of logs.
impl fmt::Debug for MagicCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MagicCookie(..)")
    }
}

/// Outcome of a registration attempt, carried in every RegistrationReply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RegistrationStatus {
    /// Registration accepted; the reply's agent id is confirmed.
    Ok = 0,
    /// The magic cookie did not match the router's.
    WrongCookie = 1,
    /// The requested agent id is bound to another live connection.
    AgentIdInUse = 2,
    /// The requested agent id was never issued by this router.
    InvalidAgentId = 3,
    /// The remembered router id belongs to a previous router incarnation.
    InvalidRouterId = 4,
}

impl RegistrationStatus {
    /// Returns the wire code for this status.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for RegistrationStatus {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        match code {
            0 => Ok(Self::Ok),
            1 => Ok(Self::WrongCookie),
            2 => Ok(Self::AgentIdInUse),
            3 => Ok(Self::InvalidAgentId),
            4 => Ok(Self::InvalidRouterId),
            other => Err(other),
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::WrongCookie => "wrong magic cookie",
            Self::AgentIdInUse => "agent id in use",
            Self::InvalidAgentId => "invalid agent id",
            Self::InvalidRouterId => "invalid router id",
        };
        f.write_str(s)
    }
}

/// Delivery outcome carried in every DataReply.
///
/// `Ok` replies are produced by the recipient agent; the error codes are
/// synthesized by the router when a DataRequest cannot be forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeliveryStatus {
    /// Normal reply from the recipient agent.
    Ok = 0,
    /// The recipient agent id is not bound at the router.
    UnknownRecipient = 1,
    /// The recipient disconnected while the request was being forwarded.
    RecipientGone = 2,
    /// The recipient's delivery queue is full.
    RecipientBusy = 3,
}

impl DeliveryStatus {
    /// Returns the wire code for this status.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for DeliveryStatus {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        match code {
            0 => Ok(Self::Ok),
            1 => Ok(Self::UnknownRecipient),
            2 => Ok(Self::RecipientGone),
            3 => Ok(Self::RecipientBusy),
            other => Err(other),
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::UnknownRecipient => "unknown recipient",
            Self::RecipientGone => "recipient disconnected",
            Self::RecipientBusy => "recipient busy",
        };
        f.write_str(s)
    }
}
