use crate::config::AgentConfig;
use crate::connection::{connection_manager, dial, register_on, AgentStatus, ManagerCtx, Outbound};
use crate::connector::{Connector, TcpConnector};
use crate::dispatch::Dispatcher;
use crate::error::AgentError;
use crate::sequence::MessageIdSequence;
use mxr_proto::AgentID;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Outbound requests queued while the link is re-establishing.
const OUTBOX_DEPTH: usize = 256;

/// Handle to a registered agent.
///
/// The agent owns a background connection task that keeps one registered
/// link to the router alive, reconnecting with backoff under the same
/// identity when it drops. Dropping the handle (or calling
/// [`shutdown`](Self::shutdown)) stops the task.
#[derive(Debug)]
pub struct Agent {
    agent_id: AgentID,
    router_id: u64,
    outbox_tx: mpsc::Sender<Outbound>,
    status_rx: watch::Receiver<AgentStatus>,
    shutdown_tx: watch::Sender<bool>,
    seq: Arc<MessageIdSequence>,
    send_timeout: Duration,
}

impl Agent {
    /// Connect to the router at `config.router_addr` over plain TCP and
    /// register.
    ///
    /// The first connect and registration run inline so configuration
    /// errors (unreachable router, wrong cookie, identity in use) surface
    /// here instead of being retried forever. Requests arriving through
    /// `dispatcher` are answered with whatever payload it returns; pass
    /// `None` to acknowledge every request with an absent payload.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid, the router is
    /// unreachable, or it rejects the registration.
    pub async fn connect(
        config: AgentConfig,
        dispatcher: Option<Arc<dyn Dispatcher>>,
    ) -> Result<Self, AgentError> {
        let connector = TcpConnector::new(config.router_addr);
        Self::connect_with(config, connector, dispatcher).await
    }

    /// Connect through a caller-supplied transport and register.
    ///
    /// `connector` replaces the plain TCP dial, for callers tunnelling the
    /// link through TLS or SSH; everything else behaves as
    /// [`connect`](Self::connect). Reconnection attempts reuse the same
    /// connector.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn connect_with<C: Connector>(
        config: AgentConfig,
        connector: C,
        dispatcher: Option<Arc<dyn Dispatcher>>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        let seq = Arc::new(MessageIdSequence::new());

        let mut framed = dial(&connector, &config).await?;
        let (agent_id, router_id) =
            register_on::<C>(&mut framed, &config, &seq, config.agent_id, 0).await?;

        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_DEPTH);
        let (status_tx, status_rx) = watch::channel(AgentStatus::Ready);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let send_timeout = config.send_timeout;

        let ctx = ManagerCtx {
            config,
            connector,
            dispatcher,
            outbox_rx,
            status_tx,
            shutdown_rx,
            seq: Arc::clone(&seq),
            agent_id,
            router_id,
        };
        tokio::spawn(connection_manager(ctx, framed));

        Ok(Self {
            agent_id,
            router_id,
            outbox_tx,
            status_rx,
            shutdown_tx,
            seq,
            send_timeout,
        })
    }

    /// Send a request to `dest` and wait for its reply, using the
    /// configured default timeout.
    ///
    /// # Errors
    ///
    /// See [`send_with_timeout`](Self::send_with_timeout).
    pub async fn send(
        &self,
        dest: AgentID,
        payload: Option<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>, AgentError> {
        self.send_with_timeout(dest, payload, self.send_timeout).await
    }

    /// Send a request to `dest` and wait up to `timeout` for its reply.
    ///
    /// While the link is reconnecting the request is queued and goes out
    /// once re-registration completes, still bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// [`AgentError::Timeout`] when no reply arrives in time (a late reply
    /// is discarded), [`AgentError::Unroutable`] when the router could not
    /// deliver the request, [`AgentError::ConnectionLost`] when the link
    /// died with the request in flight, [`AgentError::ShutDown`] when the
    /// agent was shut down.
    pub async fn send_with_timeout(
        &self,
        dest: AgentID,
        payload: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, AgentError> {
        let msg_id = self.seq.next();
        let (reply_tx, reply_rx) = oneshot::channel();
        let outbound = Outbound {
            msg_id,
            dest,
            payload,
            reply_tx,
        };

        // The deadline covers the enqueue as well: with the outbox full
        // during an outage, waiting for a slot must not outlive `timeout`.
        let attempt = async {
            self.outbox_tx
                .send(outbound)
                .await
                .map_err(|_| AgentError::ShutDown)?;
            match reply_rx.await {
                Ok(result) => result,
                Err(_) => Err(AgentError::ConnectionLost),
            }
        };
        match tokio::time::timeout(timeout, attempt).await {
            Err(_) => Err(AgentError::Timeout),
            Ok(result) => result,
        }
    }

    /// The identity this agent is registered under.
    #[must_use]
    pub const fn agent_id(&self) -> AgentID {
        self.agent_id
    }

    /// Id of the router incarnation this agent registered with.
    #[must_use]
    pub const fn router_id(&self) -> u64 {
        self.router_id
    }

    /// Current link status.
    #[must_use]
    pub fn status(&self) -> AgentStatus {
        *self.status_rx.borrow()
    }

    /// Watch receiver for link status changes, for callers that want to
    /// wait for [`AgentStatus::Ready`].
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<AgentStatus> {
        self.status_rx.clone()
    }

    /// Routable URI for a resource hosted on this agent.
    #[must_use]
    pub fn uri(&self, path: &str) -> String {
        self.agent_id.uri(path)
    }

    /// Stop the connection task. In-flight requests fail with
    /// [`AgentError::ConnectionLost`]; later sends fail with
    /// [`AgentError::ShutDown`].
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}
