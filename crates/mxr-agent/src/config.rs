use crate::error::AgentError;
use mxr_proto::{AgentID, MagicCookie};
use std::net::SocketAddr;
use std::time::Duration;

/// Reconnect backoff parameters.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnect attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between reconnect attempts, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}

/// Runtime configuration for one [`Agent`](crate::Agent).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Router address to connect to.
    pub router_addr: SocketAddr,
    /// Agent id to request at registration. `None` asks the router to
    /// assign a fresh one.
    pub agent_id: Option<AgentID>,
    /// Shared secret presented at registration.
    pub cookie: MagicCookie,
    /// Connect plus registration handshake timeout.
    pub connect_timeout: Duration,
    /// Default timeout applied by [`Agent::send`](crate::Agent::send).
    pub send_timeout: Duration,
    /// Reconnection backoff settings.
    pub reconnect: ReconnectConfig,
}

impl AgentConfig {
    /// Configuration with default timeouts and backoff.
    #[must_use]
    pub fn new(router_addr: SocketAddr, cookie: MagicCookie) -> Self {
        Self {
            router_addr,
            agent_id: None,
            cookie,
            connect_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Validates the configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] describing the first violation found.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.connect_timeout.is_zero() {
            return Err(AgentError::Config(
                "connect_timeout must be greater than 0".to_string(),
            ));
        }
        if self.connect_timeout > Duration::from_secs(300) {
            return Err(AgentError::Config(
                "connect_timeout exceeds reasonable limit (300 seconds)".to_string(),
            ));
        }
        if self.send_timeout.is_zero() {
            return Err(AgentError::Config(
                "send_timeout must be greater than 0".to_string(),
            ));
        }
        if self.reconnect.initial_delay_ms == 0 {
            return Err(AgentError::Config(
                "reconnect.initial_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(AgentError::Config(
                "reconnect.max_delay_ms must not be below initial_delay_ms".to_string(),
            ));
        }
        if self.reconnect.backoff_factor < 1.0 {
            return Err(AgentError::Config(
                "reconnect.backoff_factor must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}
