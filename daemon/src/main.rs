//! sand-daemon entry point.
//!
//! Loads the configuration, restores route and process state from the cache
//! directory, then serves manager commands until SIGINT or SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sand_daemon::app::AgentContext;
use sand_daemon::cli::Cli;
use sand_daemon::infra::load_config;
use sand_daemon::server;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.default_log_level())),
        )
        .init();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load configuration {}", cli.config.display()))?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    tracing::info!(
        name = %config.name,
        role = ?config.role,
        listen = %config.listen,
        "sand-daemon starting"
    );

    let cancel = CancellationToken::new();
    let ctx = Arc::new(AgentContext::bootstrap(&config, cancel.clone()).await);

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;

    tokio::spawn(shutdown_signal(cancel));
    server::serve(listener, Arc::clone(&ctx)).await;

    ctx.shutdown(config.role).await;
    tracing::info!("sand-daemon shut down");
    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("received shutdown signal");
    token.cancel();
}
