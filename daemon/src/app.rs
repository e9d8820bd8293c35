//! Daemon context: the shared services handed to every connection task.
//!
//! `AgentContext` is built once at startup and shared behind an `Arc`; the
//! route manager and supervisor inside it carry their own locking.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::application::{RouteManager, RouteSettings, Supervisor};
use crate::domain::{DaemonConfig, Role};
use crate::infra::{
    IpRouteBackend, JsonRouteSnapshotStore, PidFile, ProcessSupervisor, TestRunner,
    TokioCommandRunner, TopologyFile,
};

/// How long a new connection waits for the supervisor to be initialized.
#[derive(Debug, Clone, Copy)]
pub struct InitWait {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for InitWait {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

pub struct AgentContext {
    pub supervisor: Arc<dyn Supervisor>,
    pub routes: Arc<RouteManager>,
    pub tests: TestRunner,
    /// Root of the content received with DEPLOY and CONFIGURE.
    pub deploy_dir: PathBuf,
    pub read_timeout: Duration,
    pub init_wait: InitWait,
    /// Cancelled when the daemon shuts down.
    pub cancel: CancellationToken,
}

impl AgentContext {
    /// Build the production services for `config` and restore their state
    /// from the cache directory.
    ///
    /// Restore failures are logged: the route manager then starts empty and
    /// an unrestorable supervisor stays uninitialized, which connections
    /// report to the manager.
    pub async fn bootstrap(config: &DaemonConfig, cancel: CancellationToken) -> Self {
        let routes = Arc::new(RouteManager::new(
            IpRouteBackend::new(TokioCommandRunner::default()),
            JsonRouteSnapshotStore,
            TopologyFile::new(config.topology_file.clone()),
        ));
        if config.role.needs_routes() {
            routes
                .load(RouteSettings {
                    cache_dir: config.cache_dir.clone(),
                    local_name: config.name.clone(),
                    interface: config.interface.clone(),
                    is_workstation: config.role.is_workstation(),
                    instance: config.instance.clone(),
                })
                .await;
        } else {
            routes.mark_unused();
        }

        let supervisor = ProcessSupervisor::new(
            config.binaries.clone(),
            PidFile::in_dir(&config.cache_dir),
            TokioCommandRunner::default(),
        );
        if let Err(e) = supervisor.load().await {
            error!(error = ?e, "process list is not initialized");
        }
        info!(
            name = %config.name,
            role = ?config.role,
            binaries = config.binaries.len(),
            "daemon state restored"
        );

        Self {
            supervisor: Arc::new(supervisor),
            routes,
            tests: TestRunner::new(config.test_result_file.clone(), cancel.clone()),
            deploy_dir: config.deploy_dir.clone(),
            read_timeout: config.read_timeout(),
            init_wait: InitWait::default(),
            cancel,
        }
    }

    /// Teardown on exit. Only a workstation has routes to withdraw here.
    pub async fn shutdown(&self, role: Role) {
        if !role.is_workstation() {
            return;
        }
        if let Err(e) = self.routes.delete().await {
            error!(error = ?e, "unable to remove workstation routes");
        }
    }
}
