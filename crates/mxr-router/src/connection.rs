use crate::error::RouterError;
use crate::server::RouterState;
use crate::table::ConnHandle;
use futures_util::{SinkExt, StreamExt};
use mxr_proto::{AgentID, DeliveryStatus, Message, MessageCodec, RegistrationStatus};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Frames buffered per connection before the sender sees backpressure.
const DELIVERY_QUEUE_DEPTH: usize = 256;

/// Serve one agent connection: registration handshake first, then the
/// forwarding loop until the peer disconnects or misbehaves.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: &RouterState,
) -> Result<(), RouterError> {
    let mut framed = Framed::new(stream, MessageCodec::new(state.config.max_frame));

    let Registration {
        agent_id,
        registered_at,
        mut deliver_rx,
    } = tokio::time::timeout(
        Duration::from_secs(state.config.registration_timeout),
        register(&mut framed, peer, state),
    )
    .await
    .map_err(|_| RouterError::RegistrationTimeout)??;

    let result = forward_loop(&mut framed, agent_id, &mut deliver_rx, state).await;

    state.table.remove_if(&agent_id, registered_at);
    info!(agent_id = %agent_id, "connection from {} closed", peer);
    result
}

struct Registration {
    agent_id: AgentID,
    registered_at: Instant,
    deliver_rx: mpsc::Receiver<Message>,
}

async fn register(
    framed: &mut Framed<TcpStream, MessageCodec>,
    peer: SocketAddr,
    state: &RouterState,
) -> Result<Registration, RouterError> {
    let frame = match framed.next().await {
        Some(frame) => frame?,
        None => return Err(RouterError::ConnectionClosed),
    };

    let (msg_id, requested, router_id, cookie) = match frame {
        Message::RegistrationRequest {
            msg_id,
            agent_id,
            router_id,
            cookie,
        } => (msg_id, agent_id, router_id, cookie),
        other => return Err(RouterError::UnexpectedFrame(other.kind())),
    };

    if cookie != state.cookie {
        warn!("registration from {} rejected: wrong cookie", peer);
        return reject(framed, msg_id, requested, state, RegistrationStatus::WrongCookie).await;
    }

    if router_id != 0 && router_id != state.router_id {
        // The agent is reconnecting to a different router incarnation; its
        // old binding is gone and it must start over.
        warn!(
            "registration from {} rejected: router id {:#x} does not match",
            peer, router_id
        );
        return reject(
            framed,
            msg_id,
            requested,
            state,
            RegistrationStatus::InvalidRouterId,
        )
        .await;
    }

    let (tx, deliver_rx) = mpsc::channel(DELIVERY_QUEUE_DEPTH);

    let agent_id = match requested {
        Some(id) => {
            if !state.was_issued(id) {
                warn!("registration from {} rejected: unissued agent id {}", peer, id);
                return reject(
                    framed,
                    msg_id,
                    requested,
                    state,
                    RegistrationStatus::InvalidAgentId,
                )
                .await;
            }
            id
        }
        None => state.allocate_agent_id(),
    };

    let registered_at = Instant::now();
    let handle = ConnHandle {
        tx,
        agent_id,
        registered_at,
    };
    if !state.table.try_insert(agent_id, handle) {
        warn!("registration from {} rejected: agent id {} in use", peer, agent_id);
        return reject(
            framed,
            msg_id,
            requested,
            state,
            RegistrationStatus::AgentIdInUse,
        )
        .await;
    }

    let confirm = Message::registration_reply(
        msg_id,
        agent_id,
        state.router_id,
        RegistrationStatus::Ok,
    );
    if let Err(e) = framed.send(confirm).await {
        state.table.remove_if(&agent_id, registered_at);
        return Err(e.into());
    }

    info!(agent_id = %agent_id, "agent registered from {}", peer);
    Ok(Registration {
        agent_id,
        registered_at,
        deliver_rx,
    })
}

/// Sends a rejection reply, then fails the handshake.
async fn reject(
    framed: &mut Framed<TcpStream, MessageCodec>,
    msg_id: u64,
    requested: Option<AgentID>,
    state: &RouterState,
    status: RegistrationStatus,
) -> Result<Registration, RouterError> {
    let reply = Message::registration_reply(
        msg_id,
        requested.unwrap_or(AgentID::new(0)),
        state.router_id,
        status,
    );
    framed.send(reply).await?;
    Err(RouterError::Registration(status))
}

async fn forward_loop(
    framed: &mut Framed<TcpStream, MessageCodec>,
    agent_id: AgentID,
    deliver_rx: &mut mpsc::Receiver<Message>,
    state: &RouterState,
) -> Result<(), RouterError> {
    loop {
        tokio::select! {
            frame = framed.next() => {
                let frame = match frame {
                    Some(frame) => frame?,
                    None => return Ok(()),
                };
                if let Some(reply) = route(frame, agent_id, state)? {
                    framed.send(reply).await?;
                }
            }
            delivery = deliver_rx.recv() => {
                // The sending half lives in the table for as long as this
                // loop runs, so recv never yields None here.
                match delivery {
                    Some(msg) => framed.send(msg).await?,
                    None => return Ok(()),
                }
            }
        }
    }
}

/// Route one inbound frame from `agent_id`. Returns a reply frame to send
/// back on the same connection, if any.
fn route(
    frame: Message,
    agent_id: AgentID,
    state: &RouterState,
) -> Result<Option<Message>, RouterError> {
    let (msg_id, sender, recipient, is_request) = match &frame {
        Message::DataRequest {
            msg_id,
            sender,
            recipient,
            ..
        } => (*msg_id, *sender, *recipient, true),
        Message::DataReply {
            msg_id,
            sender,
            recipient,
            ..
        } => (*msg_id, *sender, *recipient, false),
        other => return Err(RouterError::UnexpectedFrame(other.kind())),
    };

    if sender != agent_id {
        // An agent may only speak for itself.
        debug!(
            "dropping frame from {} claiming sender {}",
            agent_id, sender
        );
        return Ok(None);
    }

    let Some(handle) = state.table.get(&recipient) else {
        debug!("no route to {} for frame from {}", recipient, agent_id);
        return Ok(undeliverable(
            msg_id,
            recipient,
            agent_id,
            is_request,
            DeliveryStatus::UnknownRecipient,
        ));
    };

    match handle.tx.try_send(frame) {
        Ok(()) => Ok(None),
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!("delivery queue for {} is full", recipient);
            Ok(undeliverable(
                msg_id,
                recipient,
                agent_id,
                is_request,
                DeliveryStatus::RecipientBusy,
            ))
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            // The recipient's loop exited but its table entry has not been
            // reaped yet. Reap it here so later senders fail fast.
            state.table.remove_if(&recipient, handle.registered_at);
            debug!("recipient {} is gone", recipient);
            Ok(undeliverable(
                msg_id,
                recipient,
                agent_id,
                is_request,
                DeliveryStatus::RecipientGone,
            ))
        }
    }
}

/// Builds the error reply for an undeliverable DataRequest. Undeliverable
/// DataReplies are dropped: the requester is no longer waiting, and a
/// reply to a reply would loop.
fn undeliverable(
    msg_id: u64,
    unreachable: AgentID,
    requester: AgentID,
    is_request: bool,
    status: DeliveryStatus,
) -> Option<Message> {
    is_request.then(|| Message::error_reply(msg_id, unreachable, requester, status))
}
