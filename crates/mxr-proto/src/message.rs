//! Binary message serialization and parsing.
//!
//! Every frame starts with a fixed header:
//!
//! ```text
//! [length: u32][protocol id: u32][message type: u32][message id: u64]
//! ```
//!
//! all fields big-endian. `length` covers the whole frame including the
//! header and is what the stream codec uses to delimit frames. The
//! type-specific body follows; see the [`Message`] variants.

use crate::types::{AgentID, DeliveryStatus, MagicCookie, RegistrationStatus, COOKIE_SIZE, PROTOCOL_ID};
use std::fmt;
use thiserror::Error;

/// REGISTRATION_REQUEST type tag: agent → router, claims or requests an id.
pub const TYPE_REGISTRATION_REQUEST: u32 = 0;
/// REGISTRATION_REPLY type tag: router → agent, confirms or rejects.
pub const TYPE_REGISTRATION_REPLY: u32 = 1;
/// DATA_REQUEST type tag: forwarded payload expecting a reply.
pub const TYPE_DATA_REQUEST: u32 = 2;
/// DATA_REPLY type tag: forwarded reply, correlated by message id.
pub const TYPE_DATA_REPLY: u32 = 3;

/// Byte length of the common frame header.
pub const HEADER_LEN: usize = 20;

/// Sentinel agent id meaning "assign me one" in a RegistrationRequest.
const AGENT_ID_UNKNOWN: i64 = -1;

const REGISTRATION_REQUEST_BODY: usize = 8 + 8 + COOKIE_SIZE;
const REGISTRATION_REPLY_BODY: usize = 8 + 8 + 1;
const DATA_REQUEST_MIN_BODY: usize = 8 + 8 + 1;
const DATA_REPLY_MIN_BODY: usize = 8 + 8 + 1 + 1;

/// The four frame kinds, used for type-mismatch diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Agent → router registration handshake request.
    RegistrationRequest,
    /// Router → agent registration handshake reply.
    RegistrationReply,
    /// Payload frame expecting a correlated reply.
    DataRequest,
    /// Reply frame correlated to a DataRequest by message id.
    DataReply,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RegistrationRequest => "REG_REQ",
            Self::RegistrationReply => "REG_REP",
            Self::DataRequest => "DATA_REQ",
            Self::DataReply => "DATA_REP",
        };
        f.write_str(s)
    }
}

/// Errors raised while parsing a frame.
///
/// A frame that fails any of these checks is rejected before further
/// fields are trusted; the connection that produced it can no longer be
/// assumed to be in sync.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    /// Fewer bytes than the frame kind requires.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum byte count for the declared kind.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },
    /// The declared length field disagrees with the bytes present.
    #[error("length field mismatch: declared {declared}, actual {actual}")]
    LengthMismatch {
        /// Value of the length field.
        declared: usize,
        /// Bytes actually present.
        actual: usize,
    },
    /// The protocol id field is not [`PROTOCOL_ID`].
    #[error("unsupported protocol id {0}, expected {PROTOCOL_ID}")]
    UnsupportedProtocol(u32),
    /// The type tag is outside the closed set of four kinds.
    #[error("unknown message type tag {0}")]
    UnknownType(u32),
    /// A frame of one kind was demanded as another.
    #[error("unexpected message kind: expected {expected}, got {actual}")]
    UnexpectedType {
        /// The kind the caller required.
        expected: MessageKind,
        /// The kind actually decoded.
        actual: MessageKind,
    },
    /// An agent id field holds a negative non-sentinel value.
    #[error("invalid agent id field value {0}")]
    BadAgentId(i64),
    /// The payload presence flag is neither 0 nor 1.
    #[error("invalid payload flag {0}")]
    BadPayloadFlag(u8),
    /// A status byte is outside its enum's range.
    #[error("invalid status code {0}")]
    BadStatus(u8),
    /// Extra bytes after the declared body.
    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),
}

/// One self-describing unit of the wire protocol.
///
/// `serialize` is total and deterministic; `parse` validates structural
/// integrity (length, protocol id, type tag, field ranges) and refuses
/// frames that fail any check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Agent → router: claim `agent_id` (or request a fresh one) using
    /// `cookie` as the shared secret. `router_id` is 0 on first contact,
    /// or the remembered id when reclaiming after a reconnect.
    RegistrationRequest {
        /// Correlates the reply to this request.
        msg_id: u64,
        /// Requested id, or `None` for "assign me one".
        agent_id: Option<AgentID>,
        /// Router incarnation the agent expects, 0 for none.
        router_id: u64,
        /// Shared-secret registration token.
        cookie: MagicCookie,
    },
    /// Router → agent: the registration outcome. On `Ok` the carried
    /// `agent_id` is confirmed; on any other status the connection is
    /// about to be closed by the router.
    RegistrationReply {
        /// Echoes the request's message id.
        msg_id: u64,
        /// Confirmed id (meaningful only when `status` is `Ok`).
        agent_id: AgentID,
        /// This router incarnation's id.
        router_id: u64,
        /// Outcome of the registration attempt.
        status: RegistrationStatus,
    },
    /// A payload addressed to `recipient`, expecting a DataReply with the
    /// same message id and the sender/recipient roles swapped.
    DataRequest {
        /// Caller-assigned correlation id.
        msg_id: u64,
        /// Originating agent.
        sender: AgentID,
        /// Destination agent.
        recipient: AgentID,
        /// Opaque payload; `None` and `Some(vec![])` are distinct and
        /// both round-trip.
        payload: Option<Vec<u8>>,
    },
    /// The reply to a DataRequest. `status` is `Ok` for replies produced
    /// by the recipient agent; error statuses are synthesized by the
    /// router when the request could not be forwarded.
    DataReply {
        /// The originating request's message id.
        msg_id: u64,
        /// Replying agent (the original recipient).
        sender: AgentID,
        /// The original requester.
        recipient: AgentID,
        /// Delivery outcome.
        status: DeliveryStatus,
        /// Opaque reply payload.
        payload: Option<Vec<u8>>,
    },
}

impl Message {
    /// Creates a RegistrationRequest.
    #[must_use]
    pub const fn registration_request(
        msg_id: u64,
        agent_id: Option<AgentID>,
        router_id: u64,
        cookie: MagicCookie,
    ) -> Self {
        Self::RegistrationRequest {
            msg_id,
            agent_id,
            router_id,
            cookie,
        }
    }

    /// Creates a RegistrationReply.
    #[must_use]
    pub const fn registration_reply(
        msg_id: u64,
        agent_id: AgentID,
        router_id: u64,
        status: RegistrationStatus,
    ) -> Self {
        Self::RegistrationReply {
            msg_id,
            agent_id,
            router_id,
            status,
        }
    }

    /// Creates a DataRequest.
    #[must_use]
    pub const fn data_request(
        msg_id: u64,
        sender: AgentID,
        recipient: AgentID,
        payload: Option<Vec<u8>>,
    ) -> Self {
        Self::DataRequest {
            msg_id,
            sender,
            recipient,
            payload,
        }
    }

    /// Creates a normal (`Ok`) DataReply answering `msg_id`.
    #[must_use]
    pub const fn data_reply(
        msg_id: u64,
        sender: AgentID,
        recipient: AgentID,
        payload: Option<Vec<u8>>,
    ) -> Self {
        Self::DataReply {
            msg_id,
            sender,
            recipient,
            status: DeliveryStatus::Ok,
            payload,
        }
    }

    /// Creates a router-synthesized error DataReply: `unreachable` is the
    /// destination that could not be reached, `requester` the agent whose
    /// DataRequest failed.
    #[must_use]
    pub const fn error_reply(
        msg_id: u64,
        unreachable: AgentID,
        requester: AgentID,
        status: DeliveryStatus,
    ) -> Self {
        Self::DataReply {
            msg_id,
            sender: unreachable,
            recipient: requester,
            status,
            payload: None,
        }
    }

    /// Returns this message's kind.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::RegistrationRequest { .. } => MessageKind::RegistrationRequest,
            Self::RegistrationReply { .. } => MessageKind::RegistrationReply,
            Self::DataRequest { .. } => MessageKind::DataRequest,
            Self::DataReply { .. } => MessageKind::DataReply,
        }
    }

    /// Returns the message id.
    #[must_use]
    pub const fn msg_id(&self) -> u64 {
        match self {
            Self::RegistrationRequest { msg_id, .. }
            | Self::RegistrationReply { msg_id, .. }
            | Self::DataRequest { msg_id, .. }
            | Self::DataReply { msg_id, .. } => *msg_id,
        }
    }

    /// Returns the forwarding destination for data frames, `None` for
    /// registration frames (which terminate at the router).
    #[must_use]
    pub const fn recipient(&self) -> Option<AgentID> {
        match self {
            Self::DataRequest { recipient, .. } | Self::DataReply { recipient, .. } => {
                Some(*recipient)
            }
            _ => None,
        }
    }

    /// Demands that this message is of `expected` kind.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::UnexpectedType`] otherwise — the guard that
    /// keeps a desynchronized stream from being interpreted as the wrong
    /// frame kind.
    pub fn expect_kind(self, expected: MessageKind) -> Result<Self, MessageError> {
        let actual = self.kind();
        if actual == expected {
            Ok(self)
        } else {
            Err(MessageError::UnexpectedType { expected, actual })
        }
    }

    /// Serializes this message into a length-prefixed byte vector.
    ///
    /// The produced length field always equals the vector's length.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Self::RegistrationRequest {
                msg_id,
                agent_id,
                router_id,
                cookie,
            } => {
                let mut v = header(REGISTRATION_REQUEST_BODY, TYPE_REGISTRATION_REQUEST, *msg_id);
                push_opt_agent_id(&mut v, *agent_id);
                v.extend_from_slice(&router_id.to_be_bytes());
                v.extend_from_slice(cookie.as_bytes());
                v
            }
            Self::RegistrationReply {
                msg_id,
                agent_id,
                router_id,
                status,
            } => {
                let mut v = header(REGISTRATION_REPLY_BODY, TYPE_REGISTRATION_REPLY, *msg_id);
                push_agent_id(&mut v, *agent_id);
                v.extend_from_slice(&router_id.to_be_bytes());
                v.push(status.code());
                v
            }
            Self::DataRequest {
                msg_id,
                sender,
                recipient,
                payload,
            } => {
                let body = DATA_REQUEST_MIN_BODY + payload.as_ref().map_or(0, Vec::len);
                let mut v = header(body, TYPE_DATA_REQUEST, *msg_id);
                push_agent_id(&mut v, *sender);
                push_agent_id(&mut v, *recipient);
                push_payload(&mut v, payload.as_deref());
                v
            }
            Self::DataReply {
                msg_id,
                sender,
                recipient,
                status,
                payload,
            } => {
                let body = DATA_REPLY_MIN_BODY + payload.as_ref().map_or(0, Vec::len);
                let mut v = header(body, TYPE_DATA_REPLY, *msg_id);
                push_agent_id(&mut v, *sender);
                push_agent_id(&mut v, *recipient);
                v.push(status.code());
                push_payload(&mut v, payload.as_deref());
                v
            }
        }
    }

    /// Parses exactly one frame.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError`] when the length field disagrees with the
    /// bytes present, the protocol id or type tag is unrecognized, or any
    /// type-specific field is out of range.
    pub fn parse(data: &[u8]) -> Result<Self, MessageError> {
        if data.len() < HEADER_LEN {
            return Err(MessageError::TooShort {
                expected: HEADER_LEN,
                actual: data.len(),
            });
        }
        let declared = read_u32(data, 0) as usize;
        if declared != data.len() {
            return Err(MessageError::LengthMismatch {
                declared,
                actual: data.len(),
            });
        }
        let proto = read_u32(data, 4);
        if proto != PROTOCOL_ID {
            return Err(MessageError::UnsupportedProtocol(proto));
        }
        let tag = read_u32(data, 8);
        let msg_id = read_u64(data, 12);
        let body = &data[HEADER_LEN..];

        match tag {
            TYPE_REGISTRATION_REQUEST => {
                check_exact_body(body, REGISTRATION_REQUEST_BODY)?;
                let agent_id = read_opt_agent_id(body, 0)?;
                let router_id = read_u64(body, 8);
                let mut cookie = [0u8; COOKIE_SIZE];
                cookie.copy_from_slice(&body[16..16 + COOKIE_SIZE]);
                Ok(Self::RegistrationRequest {
                    msg_id,
                    agent_id,
                    router_id,
                    cookie: MagicCookie::from_bytes(cookie),
                })
            }
            TYPE_REGISTRATION_REPLY => {
                check_exact_body(body, REGISTRATION_REPLY_BODY)?;
                let agent_id = read_agent_id(body, 0)?;
                let router_id = read_u64(body, 8);
                let status = RegistrationStatus::try_from(body[16])
                    .map_err(MessageError::BadStatus)?;
                Ok(Self::RegistrationReply {
                    msg_id,
                    agent_id,
                    router_id,
                    status,
                })
            }
            TYPE_DATA_REQUEST => {
                check_min_body(body, DATA_REQUEST_MIN_BODY)?;
                let sender = read_agent_id(body, 0)?;
                let recipient = read_agent_id(body, 8)?;
                let payload = read_payload(body, 16)?;
                Ok(Self::DataRequest {
                    msg_id,
                    sender,
                    recipient,
                    payload,
                })
            }
            TYPE_DATA_REPLY => {
                check_min_body(body, DATA_REPLY_MIN_BODY)?;
                let sender = read_agent_id(body, 0)?;
                let recipient = read_agent_id(body, 8)?;
                let status = DeliveryStatus::try_from(body[16]).map_err(MessageError::BadStatus)?;
                let payload = read_payload(body, 17)?;
                Ok(Self::DataReply {
                    msg_id,
                    sender,
                    recipient,
                    status,
                    payload,
                })
            }
            other => Err(MessageError::UnknownType(other)),
        }
    }
}

fn header(body_len: usize, tag: u32, msg_id: u64) -> Vec<u8> {
    let total = HEADER_LEN + body_len;
    let mut v = Vec::with_capacity(total);
    v.extend_from_slice(&(total as u32).to_be_bytes());
    v.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
    v.extend_from_slice(&tag.to_be_bytes());
    v.extend_from_slice(&msg_id.to_be_bytes());
    v
}

fn push_agent_id(v: &mut Vec<u8>, id: AgentID) {
    v.extend_from_slice(&(id.value() as i64).to_be_bytes());
}

fn push_opt_agent_id(v: &mut Vec<u8>, id: Option<AgentID>) {
    match id {
        Some(id) => push_agent_id(v, id),
        None => v.extend_from_slice(&AGENT_ID_UNKNOWN.to_be_bytes()),
    }
}

fn push_payload(v: &mut Vec<u8>, payload: Option<&[u8]>) {
    match payload {
        Some(bytes) => {
            v.push(1);
            v.extend_from_slice(bytes);
        }
        None => v.push(0),
    }
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap())
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    u64::from_be_bytes(data[offset..offset + 8].try_into().unwrap())
}

fn read_i64(data: &[u8], offset: usize) -> i64 {
    i64::from_be_bytes(data[offset..offset + 8].try_into().unwrap())
}

fn read_agent_id(body: &[u8], offset: usize) -> Result<AgentID, MessageError> {
    let raw = read_i64(body, offset);
    if raw >= 0 {
        Ok(AgentID::new(raw as u64))
    } else {
        Err(MessageError::BadAgentId(raw))
    }
}

fn read_opt_agent_id(body: &[u8], offset: usize) -> Result<Option<AgentID>, MessageError> {
    let raw = read_i64(body, offset);
    if raw >= 0 {
        Ok(Some(AgentID::new(raw as u64)))
    } else if raw == AGENT_ID_UNKNOWN {
        Ok(None)
    } else {
        Err(MessageError::BadAgentId(raw))
    }
}

fn read_payload(body: &[u8], offset: usize) -> Result<Option<Vec<u8>>, MessageError> {
    match body[offset] {
        0 => {
            let trailing = body.len() - offset - 1;
            if trailing != 0 {
                return Err(MessageError::TrailingBytes(trailing));
            }
            Ok(None)
        }
        1 => Ok(Some(body[offset + 1..].to_vec())),
        other => Err(MessageError::BadPayloadFlag(other)),
    }
}

fn check_exact_body(body: &[u8], expected: usize) -> Result<(), MessageError> {
    if body.len() < expected {
        return Err(MessageError::TooShort {
            expected: HEADER_LEN + expected,
            actual: HEADER_LEN + body.len(),
        });
    }
    if body.len() > expected {
        return Err(MessageError::TrailingBytes(body.len() - expected));
    }
    Ok(())
}

fn check_min_body(body: &[u8], min: usize) -> Result<(), MessageError> {
    if body.len() < min {
        return Err(MessageError::TooShort {
            expected: HEADER_LEN + min,
            actual: HEADER_LEN + body.len(),
        });
    }
    Ok(())
}
