use crate::config::RouterConfig;
use crate::connection::handle_connection;
use crate::error::RouterError;
use crate::table::ConnectionTable;
use mxr_proto::{AgentID, MagicCookie};
use rand::Rng;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Shared state for the relay router.
pub struct RouterState {
    /// Connection table mapping agent ids to live connections.
    pub table: ConnectionTable,
    /// Shared secret agents must present at registration.
    pub cookie: MagicCookie,
    /// Runtime router configuration.
    pub config: RouterConfig,
    /// Random nonzero id of this router incarnation. Bindings do not
    /// survive restarts; a changed router id tells reconnecting agents so.
    pub router_id: u64,
    /// Counter for active connections (registered or not).
    pub active_connections: AtomicUsize,
    next_agent_id: AtomicU64,
}

impl RouterState {
    /// Creates fresh state with a random router id.
    #[must_use]
    pub fn new(config: RouterConfig, cookie: MagicCookie) -> Self {
        Self {
            table: ConnectionTable::new(),
            cookie,
            config,
            router_id: rand::thread_rng().gen_range(1..=u64::MAX),
            active_connections: AtomicUsize::new(0),
            next_agent_id: AtomicU64::new(0),
        }
    }

    /// Allocates a fresh, never-issued agent id.
    pub fn allocate_agent_id(&self) -> AgentID {
        AgentID::new(self.next_agent_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns `true` if this router session has ever issued `agent_id`.
    #[must_use]
    pub fn was_issued(&self, agent_id: AgentID) -> bool {
        agent_id.value() < self.next_agent_id.load(Ordering::Relaxed)
    }
}

/// Run the accept loop until it fails.
///
/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run(listener: TcpListener, state: Arc<RouterState>) -> Result<(), RouterError> {
    let (shutdown_tx, _) = tokio::sync::watch::channel(());
    run_with_shutdown(listener, state, shutdown_tx).await
}

/// Run the accept loop with an externally-controlled shutdown signal.
///
/// When `shutdown_tx` is dropped or signalled, the loop stops accepting
/// new connections and waits for in-flight connections to drain.
///
/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: Arc<RouterState>,
    shutdown_tx: tokio::sync::watch::Sender<()>,
) -> Result<(), RouterError> {
    let local_addr = listener.local_addr()?;
    info!(router_id = state.router_id, "router listening on {}", local_addr);
    let mut shutdown_rx = shutdown_tx.subscribe();
    let mut connections = tokio::task::JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        if state.active_connections.load(Ordering::Relaxed) >= state.config.max_conns {
                            warn!("max connections reached, rejecting {}", addr);
                            drop(stream);
                            continue;
                        }
                        state.active_connections.fetch_add(1, Ordering::Relaxed);
                        let state = Arc::clone(&state);
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, &state).await {
                                tracing::debug!("connection from {} closed: {}", addr, e);
                            }
                            state.active_connections.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
            }
            // Reap finished connection tasks as we go, so the drain below
            // only waits on connections that are actually still open.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown_rx.changed() => {
                info!("shutdown signal received, draining {} connections", connections.len());
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (with timeout)
    let drain_timeout = std::time::Duration::from_secs(30);
    let drained = tokio::time::timeout(drain_timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "drain timeout reached with {} connections still active",
            connections.len()
        );
        connections.shutdown().await;
    }

    info!("router shut down gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> RouterState {
        let config = RouterConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            max_conns: 100,
            max_frame: 1_048_576,
            registration_timeout: 5,
        };
        RouterState::new(config, MagicCookie::random())
    }

    #[test]
    fn agent_ids_are_sequential_and_unique() {
        let state = test_state();
        let a = state.allocate_agent_id();
        let b = state.allocate_agent_id();
        assert_ne!(a, b);
        assert!(state.was_issued(a));
        assert!(state.was_issued(b));
    }

    #[test]
    fn unissued_id_is_not_reclaimable() {
        let state = test_state();
        let _ = state.allocate_agent_id();
        assert!(!state.was_issued(AgentID::new(1000)));
    }

    #[test]
    fn router_id_is_nonzero() {
        assert_ne!(test_state().router_id, 0);
    }
}
