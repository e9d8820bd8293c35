//! Command listener: one task per manager connection.

pub mod handler;
pub mod session;
pub mod stream;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::app::AgentContext;

/// Accept connections until the context is cancelled, then wait for the
/// connections already accepted to finish.
pub async fn serve(listener: TcpListener, ctx: Arc<AgentContext>) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening for commands");
    }
    let connections = TaskTracker::new();
    loop {
        tokio::select! {
            () = ctx.cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let ctx = Arc::clone(&ctx);
                    connections.spawn(async move {
                        handler::handle_connection(ctx, stream, peer).await;
                    });
                }
                Err(e) => error!(error = %e, "accept error"),
            }
        }
    }
    drop(listener);
    connections.close();
    info!(pending = connections.len(), "listener stopped, waiting for connections");
    connections.wait().await;
}
