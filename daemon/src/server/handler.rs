//! One manager connection: read a command, run it, reply.
//!
//! Every command gets its replies on the same connection, which is then
//! closed. Failures that stop a command are answered with a single
//! `ERROR <reason>` line.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

use sand_common::{Instruction, Reply, TestRequest};

use crate::app::AgentContext;
use crate::domain::{
    ConfigError, PersistenceError, RouteError, SessionError, SupervisorError, TopologyError,
};
use crate::infra::TestOutcome;
use crate::server::session::Session;
use crate::server::stream::DeployReceiver;

/// Serve one accepted connection until its command is done.
pub async fn handle_connection<S>(ctx: Arc<AgentContext>, io: S, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    info!(%peer, "connection opened");
    let mut session =
        Session::new(io, ctx.read_timeout).with_cancel(ctx.cancel.clone());
    if let Err(e) = serve(&ctx, &mut session).await {
        match e.downcast_ref::<SessionError>() {
            Some(SessionError::Timeout(_)) => warn!(%peer, error = %e, "no command received"),
            Some(SessionError::PeerClosed) => debug!(%peer, "distant socket is closed"),
            Some(SessionError::Shutdown) => debug!(%peer, "connection dropped on shutdown"),
            _ => error!(%peer, error = ?e, "command failed"),
        }
    }
    info!(%peer, "connection closed");
}

async fn serve<S>(ctx: &AgentContext, session: &mut Session<S>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if !wait_for_supervisor(ctx).await {
        warn!("process list is not initialized, command refused");
        session
            .send(&Reply::error(SupervisorError::NotInitialized.to_string()))
            .await?;
        return Ok(());
    }

    let Some(line) = read_request(session).await? else {
        return Ok(());
    };
    let instruction = Instruction::parse(&line);
    info!(command = %instruction, "command received");
    match instruction {
        Instruction::Deploy | Instruction::Configure => {
            session.send(&Reply::Ok).await?;
            DeployReceiver::new(&ctx.deploy_dir).receive(session).await?;
        }
        Instruction::Start => {
            let reply = match start(ctx).await {
                Ok(()) => Reply::Ok,
                Err(e) => {
                    error!(error = ?e, "cannot start the platform");
                    Reply::error(start_failure_message(&e))
                }
            };
            session.send(&reply).await?;
        }
        Instruction::Stop => {
            stop(ctx).await;
            session.send(&Reply::Ok).await?;
        }
        Instruction::Test => run_test(ctx, session).await?,
        Instruction::Unknown(text) => {
            session.send(&Reply::unknown_command(&text)).await?;
        }
    }
    Ok(())
}

/// Read a request line. A malformed line is answered with
/// `ERROR bad instruction` and yields `None`.
async fn read_request<S>(session: &mut Session<S>) -> Result<Option<String>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match session.read_line().await {
        Ok(line) => Ok(Some(line)),
        Err(SessionError::Protocol(e)) => {
            warn!(error = %e, "malformed request");
            session.send(&Reply::error("bad instruction")).await?;
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

async fn wait_for_supervisor(ctx: &AgentContext) -> bool {
    for attempt in 0..ctx.init_wait.attempts {
        if ctx.supervisor.is_initialized() {
            return true;
        }
        debug!(attempt, "waiting for the process list");
        tokio::time::sleep(ctx.init_wait.delay).await;
    }
    ctx.supervisor.is_initialized()
}

async fn start(ctx: &AgentContext) -> Result<()> {
    ctx.routes.setup_routes(None).await?;
    ctx.supervisor.start().await
}

/// Best-effort teardown: failures are logged, never reported.
async fn stop(ctx: &AgentContext) {
    if let Err(e) = ctx.supervisor.stop().await {
        error!(error = ?e, "cannot stop the platform binaries");
    }
    if let Err(e) = ctx.routes.remove_routes().await {
        error!(error = ?e, "cannot remove the platform routes");
    }
}

async fn run_test<S>(ctx: &AgentContext, session: &mut Session<S>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    session.send(&Reply::Ok).await?;
    let Some(line) = read_request(session).await? else {
        return Ok(());
    };
    let request = match TestRequest::parse(&line) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "test refused");
            session.send(&Reply::error("bad instruction")).await?;
            return Ok(());
        }
    };
    match ctx.tests.run(&request).await {
        Ok(TestOutcome::Exited(code)) => session.send(&Reply::ExitCode(code)).await?,
        Ok(TestOutcome::Cancelled) => debug!("test cancelled, no reply"),
        Err(e) => {
            error!(error = ?e, "test failed to run");
            session.send(&Reply::error(e.to_string())).await?;
        }
    }
    Ok(())
}

/// The reason sent back when START fails, picked from the first cause in
/// the chain that has a known category.
#[must_use]
pub fn start_failure_message(err: &anyhow::Error) -> String {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<SupervisorError>() {
            match e {
                SupervisorError::AlreadyRunning | SupervisorError::NotInitialized => {
                    return e.to_string();
                }
                SupervisorError::Launch { .. } => {}
            }
        }
        if let Some(e) = cause.downcast_ref::<RouteError>() {
            return e.to_string();
        }
        if cause.is::<TopologyError>() {
            return "cannot read topology configuration".to_string();
        }
        if cause.is::<ConfigError>() {
            return "cannot read binaries configuration".to_string();
        }
        if cause.is::<PersistenceError>() {
            return "unable to load or serialize process list".to_string();
        }
        if let Some(e) = cause.downcast_ref::<std::io::Error>() {
            if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) {
                return "cannot create directory or file".to_string();
            }
        }
    }
    "unable to start process list".to_string()
}
