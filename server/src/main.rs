use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rce_agent::{bind, Server, ServerArgs};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let settings = ServerArgs::parse()
        .into_config()
        .and_then(|config| config.build())
        .context("invalid configuration")?;

    let server = Arc::new(Server::new(settings.policy));
    let handle = bind(&settings.addr, server, settings.tls).await?;

    shutdown_signal().await;
    info!("shutting down");
    handle.shutdown().await;

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
