use clap::Parser;
use std::net::SocketAddr;

/// CLI arguments for the relay router.
#[derive(Parser, Debug, Clone)]
#[command(name = "mxr-router")]
#[command(about = "MXR relay router")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on.
    #[arg(long, default_value = "0.0.0.0:18700", env = "MXR_LISTEN")]
    pub listen: SocketAddr,
    /// Magic cookie agents must present; generated if omitted.
    #[arg(long, env = "MXR_COOKIE")]
    pub cookie: Option<String>,
    /// Maximum total concurrent agent connections.
    #[arg(long, default_value = "10000", env = "MXR_MAX_CONNS")]
    pub max_conns: usize,
    /// Maximum frame size in bytes, header included.
    #[arg(long, default_value = "1048576", env = "MXR_MAX_FRAME")]
    pub max_frame: usize,
    /// Registration handshake timeout in seconds.
    #[arg(long, default_value = "5", env = "MXR_REGISTRATION_TIMEOUT")]
    pub registration_timeout: u64,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// Maximum total concurrent agent connections.
    pub max_conns: usize,
    /// Maximum frame size in bytes, header included.
    pub max_frame: usize,
    /// Registration handshake timeout in seconds.
    pub registration_timeout: u64,
}

impl RouterConfig {
    /// Validates the configuration values are within acceptable bounds.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 1_000_000 {
            return Err("max_conns exceeds reasonable limit (1,000,000)".to_string());
        }

        if self.max_frame < mxr_proto::message::HEADER_LEN + 64 {
            return Err("max_frame too small to carry any message".to_string());
        }
        if self.max_frame > 64 * 1024 * 1024 {
            return Err("max_frame exceeds reasonable limit (64 MiB)".to_string());
        }

        if self.registration_timeout == 0 {
            return Err("registration_timeout must be greater than 0".to_string());
        }
        if self.registration_timeout > 300 {
            return Err("registration_timeout exceeds reasonable limit (300 seconds)".to_string());
        }
        Ok(())
    }
}

impl From<Args> for RouterConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            max_conns: args.max_conns,
            max_frame: args.max_frame,
            registration_timeout: args.registration_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> RouterConfig {
        RouterConfig {
            listen: "127.0.0.1:18700".parse().unwrap(),
            max_conns: 1000,
            max_frame: 1_048_576,
            registration_timeout: 5,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn max_conns_zero() {
        let mut c = valid_config();
        c.max_conns = 0;
        assert!(c.validate().unwrap_err().contains("max_conns"));
    }

    #[test]
    fn max_conns_too_large() {
        let mut c = valid_config();
        c.max_conns = 1_000_001;
        assert!(c.validate().unwrap_err().contains("max_conns"));
    }

    #[test]
    fn max_frame_too_small() {
        let mut c = valid_config();
        c.max_frame = 16;
        assert!(c.validate().unwrap_err().contains("max_frame"));
    }

    #[test]
    fn max_frame_too_large() {
        let mut c = valid_config();
        c.max_frame = 64 * 1024 * 1024 + 1;
        assert!(c.validate().unwrap_err().contains("max_frame"));
    }

    #[test]
    fn registration_timeout_zero() {
        let mut c = valid_config();
        c.registration_timeout = 0;
        assert!(c.validate().unwrap_err().contains("registration_timeout"));
    }

    #[test]
    fn registration_timeout_too_large() {
        let mut c = valid_config();
        c.registration_timeout = 301;
        assert!(c.validate().unwrap_err().contains("registration_timeout"));
    }
}
