//! Interop hub daemon.
//!
//! Run with defaults:
//!   interop-hub
//!
//! Or with a config file and overrides:
//!   interop-hub --config hub.toml --bind 127.0.0.1:9000 --intent-timeout-ms 5000

mod config;

use clap::Parser;
use config::DaemonConfig;
use interop_hub::{Hub, serve};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "interop-hub", version, about = "Desktop interop hub")]
struct Args {
    /// TOML config file.
    #[arg(long, env = "INTEROP_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file.
    #[arg(long, env = "INTEROP_BIND")]
    bind: Option<SocketAddr>,

    #[arg(long)]
    heartbeat_timeout_ms: Option<u64>,

    #[arg(long)]
    intent_timeout_ms: Option<u64>,

    /// Extra system channel; repeatable.
    #[arg(long = "channel")]
    channels: Vec<String>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::load(path)?,
            None => DaemonConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(ms) = self.heartbeat_timeout_ms {
            config.hub.heartbeat_timeout_ms = ms;
        }
        if let Some(ms) = self.intent_timeout_ms {
            config.hub.intent_timeout_ms = ms;
        }
        config.hub.user_channels.extend(self.channels);
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("interop=info".parse()?))
        .init();

    let config = Args::parse().into_config()?;
    tracing::info!(
        apps = config.apps.len(),
        channels = ?config.hub.user_channels,
        "starting hub"
    );

    let hub = Hub::start(config.hub.clone(), Arc::new(config.directory()));
    let listener = TcpListener::bind(config.bind).await?;

    let stopper = hub.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl-c: {}", e);
            return;
        }
        tracing::info!("interrupt received, shutting down");
        stopper.shutdown().await;
    });

    serve(listener, hub).await
}
