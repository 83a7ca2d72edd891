use crate::backoff::ExponentialBackoff;
use crate::config::AgentConfig;
use crate::connector::Connector;
use crate::dispatch::Dispatcher;
use crate::error::AgentError;
use crate::pending::{PendingTable, SendResult};
use crate::sequence::MessageIdSequence;
use futures_util::{SinkExt, StreamExt};
use mxr_proto::{AgentID, DeliveryStatus, Message, MessageCodec, RegistrationStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// Connection status of the agent's router link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    /// Not connected to the router.
    Disconnected,
    /// Transport connection in progress.
    Connecting,
    /// Connected, registration handshake pending.
    Registering,
    /// Registered and ready to route messages.
    Ready,
}

#[derive(Debug)]
enum SessionError {
    Fatal(anyhow::Error),
    Transient(anyhow::Error),
}

/// One outbound request handed from [`Agent::send`](crate::Agent::send) to
/// the connection task.
#[derive(Debug)]
pub(crate) struct Outbound {
    pub msg_id: u64,
    pub dest: AgentID,
    pub payload: Option<Vec<u8>>,
    pub reply_tx: oneshot::Sender<SendResult>,
}

pub(crate) struct ManagerCtx<C: Connector> {
    pub config: AgentConfig,
    pub connector: C,
    pub dispatcher: Option<Arc<dyn Dispatcher>>,
    pub outbox_rx: mpsc::Receiver<Outbound>,
    pub status_tx: watch::Sender<AgentStatus>,
    pub shutdown_rx: watch::Receiver<bool>,
    pub seq: Arc<MessageIdSequence>,
    pub agent_id: AgentID,
    pub router_id: u64,
}

/// Replies produced by dispatcher tasks, funnelled back to the single
/// writer owned by the session loop.
const DISPATCH_QUEUE_DEPTH: usize = 64;

/// Open a transport stream to the router.
pub(crate) async fn dial<C: Connector>(
    connector: &C,
    config: &AgentConfig,
) -> Result<Framed<C::Stream, MessageCodec>, AgentError> {
    let stream = tokio::time::timeout(config.connect_timeout, connector.connect())
        .await
        .map_err(|_| AgentError::Timeout)??;
    Ok(Framed::new(stream, MessageCodec::default()))
}

/// Run the registration handshake on a fresh stream.
pub(crate) async fn register_on<C: Connector>(
    framed: &mut Framed<C::Stream, MessageCodec>,
    config: &AgentConfig,
    seq: &MessageIdSequence,
    requested: Option<AgentID>,
    router_id: u64,
) -> Result<(AgentID, u64), AgentError> {
    framed
        .send(Message::registration_request(
            seq.next(),
            requested,
            router_id,
            config.cookie,
        ))
        .await?;

    let reply = match tokio::time::timeout(config.connect_timeout, framed.next()).await {
        Err(_) => return Err(AgentError::Timeout),
        Ok(None) => return Err(AgentError::ConnectionLost),
        Ok(Some(frame)) => frame?,
    };

    match reply {
        Message::RegistrationReply {
            agent_id,
            router_id,
            status,
            ..
        } => match status {
            RegistrationStatus::Ok => Ok((agent_id, router_id)),
            rejected => Err(AgentError::Registration(rejected)),
        },
        other => Err(AgentError::UnexpectedFrame(other.kind())),
    }
}

/// Top-level connection loop with automatic reconnection and backoff.
///
/// `first_session` is the already-registered stream from the initial
/// [`Agent::connect`](crate::Agent::connect), so configuration errors never
/// reach the retry path.
pub(crate) async fn connection_manager<C: Connector>(
    mut ctx: ManagerCtx<C>,
    first_session: Framed<C::Stream, MessageCodec>,
) {
    let mut backoff = ExponentialBackoff::new(
        Duration::from_millis(ctx.config.reconnect.initial_delay_ms),
        Duration::from_millis(ctx.config.reconnect.max_delay_ms),
        ctx.config.reconnect.backoff_factor,
    );

    let mut session = Some(first_session);
    loop {
        let result = match session.take() {
            Some(framed) => run_session(&mut ctx, framed).await,
            None => reconnect_and_run(&mut ctx).await,
        };

        match result {
            Ok(()) => {
                info!("agent connection closed cleanly");
                break;
            }
            Err(SessionError::Fatal(e)) => {
                error!(error = %e, "fatal agent error, not retrying");
                break;
            }
            Err(SessionError::Transient(e)) => {
                let was_ready = *ctx.status_tx.borrow() == AgentStatus::Ready;
                warn!(error = %e, "router connection lost");
                ctx.status_tx.send_replace(AgentStatus::Disconnected);
                if was_ready {
                    backoff.reset();
                }
            }
        }

        let delay = backoff.next_delay();
        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnecting"
        );
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = ctx.shutdown_rx.changed() => {
                if *ctx.shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    ctx.status_tx.send_replace(AgentStatus::Disconnected);
}

/// Reconnect, re-register under the remembered identity, then run the
/// session.
async fn reconnect_and_run<C: Connector>(ctx: &mut ManagerCtx<C>) -> Result<(), SessionError> {
    ctx.status_tx.send_replace(AgentStatus::Connecting);
    let mut framed = dial(&ctx.connector, &ctx.config)
        .await
        .map_err(|e| SessionError::Transient(e.into()))?;

    ctx.status_tx.send_replace(AgentStatus::Registering);
    let (agent_id, _) = register_on::<C>(
        &mut framed,
        &ctx.config,
        &ctx.seq,
        Some(ctx.agent_id),
        ctx.router_id,
    )
    .await
    .map_err(classify_registration)?;

    if agent_id != ctx.agent_id {
        return Err(SessionError::Fatal(anyhow::anyhow!(
            "router re-registered us as {} instead of {}",
            agent_id,
            ctx.agent_id
        )));
    }

    run_session(ctx, framed).await
}

/// Registration rejections during reconnect: a still-bound old connection
/// resolves itself once the router reaps it, everything else means this
/// identity is gone for good.
fn classify_registration(e: AgentError) -> SessionError {
    match e {
        AgentError::Registration(RegistrationStatus::AgentIdInUse) => {
            SessionError::Transient(e.into())
        }
        AgentError::Registration(_) => SessionError::Fatal(e.into()),
        other => SessionError::Transient(other.into()),
    }
}

async fn run_session<C: Connector>(
    ctx: &mut ManagerCtx<C>,
    mut framed: Framed<C::Stream, MessageCodec>,
) -> Result<(), SessionError> {
    ctx.status_tx.send_replace(AgentStatus::Ready);
    info!(agent_id = %ctx.agent_id, "registered with router");

    let mut pending = PendingTable::new();
    let result = session_loop(ctx, &mut framed, &mut pending).await;
    pending.fail_all();
    result
}

async fn session_loop<C: Connector>(
    ctx: &mut ManagerCtx<C>,
    framed: &mut Framed<C::Stream, MessageCodec>,
    pending: &mut PendingTable,
) -> Result<(), SessionError> {
    let (dispatch_tx, mut dispatch_rx) = mpsc::channel::<Message>(DISPATCH_QUEUE_DEPTH);

    loop {
        tokio::select! {
            frame = framed.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => return Err(SessionError::Transient(e.into())),
                    None => {
                        return Err(SessionError::Transient(anyhow::anyhow!(
                            "connection closed by router"
                        )))
                    }
                };
                handle_frame(ctx, frame, pending, &dispatch_tx, framed).await?;
            }

            outbound = ctx.outbox_rx.recv() => {
                // All agent handles gone, nothing left to serve.
                let Some(out) = outbound else { return Ok(()) };
                let msg = Message::data_request(out.msg_id, ctx.agent_id, out.dest, out.payload);
                pending.insert(out.msg_id, out.reply_tx);
                framed.send(msg).await.map_err(|e| SessionError::Transient(e.into()))?;
            }

            reply = dispatch_rx.recv() => {
                // dispatch_tx is held by this scope, recv cannot end.
                if let Some(msg) = reply {
                    framed.send(msg).await.map_err(|e| SessionError::Transient(e.into()))?;
                }
            }

            _ = ctx.shutdown_rx.changed() => {
                if *ctx.shutdown_rx.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_frame<C: Connector>(
    ctx: &ManagerCtx<C>,
    frame: Message,
    pending: &mut PendingTable,
    dispatch_tx: &mpsc::Sender<Message>,
    framed: &mut Framed<C::Stream, MessageCodec>,
) -> Result<(), SessionError> {
    match frame {
        Message::DataRequest {
            msg_id,
            sender,
            recipient,
            payload,
        } => {
            if recipient != ctx.agent_id {
                debug!(
                    "dropping misrouted request for {} (we are {})",
                    recipient, ctx.agent_id
                );
                return Ok(());
            }
            match &ctx.dispatcher {
                Some(dispatcher) => {
                    let dispatcher = Arc::clone(dispatcher);
                    let dispatch_tx = dispatch_tx.clone();
                    let my_id = ctx.agent_id;
                    tokio::spawn(async move {
                        let reply_payload = dispatcher.dispatch(sender, payload);
                        let reply = Message::data_reply(msg_id, my_id, sender, reply_payload);
                        if dispatch_tx.send(reply).await.is_err() {
                            debug!(msg_id, "session ended before dispatch reply was sent");
                        }
                    });
                }
                None => {
                    // Acknowledge receipt without content.
                    let reply = Message::data_reply(msg_id, ctx.agent_id, sender, None);
                    framed
                        .send(reply)
                        .await
                        .map_err(|e| SessionError::Transient(e.into()))?;
                }
            }
            Ok(())
        }

        Message::DataReply {
            msg_id,
            status,
            payload,
            ..
        } => {
            let result = match status {
                DeliveryStatus::Ok => Ok(payload),
                undelivered => Err(AgentError::Unroutable(undelivered)),
            };
            if !pending.complete(msg_id, result) {
                debug!(msg_id, "discarding reply with no waiter");
            }
            Ok(())
        }

        other => Err(SessionError::Transient(anyhow::anyhow!(
            "unexpected {} frame after registration",
            other.kind()
        ))),
    }
}
