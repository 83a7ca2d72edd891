#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use mxr_proto::MagicCookie;
use mxr_router::config::{Args, RouterConfig};
use mxr_router::{run, RouterState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config: RouterConfig = args.clone().into();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let cookie = match args.cookie {
        Some(ref raw) => raw
            .parse::<MagicCookie>()
            .map_err(|e| anyhow::anyhow!("invalid cookie: {}", e))?,
        None => {
            let cookie = MagicCookie::random();
            warn!("using ephemeral cookie (not persisted)");
            cookie
        }
    };

    let listener = TcpListener::bind(config.listen).await?;
    info!("bound to {}", config.listen);

    let state = Arc::new(RouterState::new(config, cookie));

    tokio::select! {
        result = run(listener, state) => {
            if let Err(e) = result {
                tracing::error!("router error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    Ok(())
}
