//! Application service: host route management.
//!
//! `RouteManager` owns the peer host → network table for both address
//! families, decides which peers belong to this gateway's spot, applies and
//! withdraws kernel routes, and persists the table while the platform is
//! started so a restarted daemon knows routes are already in place.
//!
//! The manager is shared by every connection task and by the discovery
//! collaborator. Every read-modify-write sequence holds the single state
//! lock for its whole duration, kernel calls and persistence included.
//! An unused manager (roles that never route) answers every mutator with
//! success before the lock is taken.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::application::ports::{RouteBackend, RouteSnapshotStore, TopologyProvider};
use crate::domain::{DistantHost, Family, HostRoutes, RouteError, RouteSnapshot, RouteTable};

/// Parameters of [`RouteManager::load`].
#[derive(Debug, Clone)]
pub struct RouteSettings {
    /// Directory holding the route snapshot.
    pub cache_dir: PathBuf,
    /// Canonical name of this host; routes toward it are refused.
    pub local_name: String,
    /// Interface routes are applied on.
    pub interface: Option<String>,
    /// Workstations apply routes immediately and never persist them.
    pub is_workstation: bool,
    /// Instance id looked up in the topology.
    pub instance: String,
}

#[derive(Debug, Default)]
struct RouteState {
    table: RouteTable,
    started: bool,
    is_workstation: bool,
    local_name: String,
    instance: String,
    /// Resolved interface; `None` means routing is degraded to logging only.
    iface: Option<String>,
    cache_dir: Option<PathBuf>,
}

impl RouteState {
    fn is_local(&self, host: &str) -> bool {
        host.eq_ignore_ascii_case(&self.local_name)
    }
}

pub struct RouteManager {
    backend: Box<dyn RouteBackend>,
    store: Box<dyn RouteSnapshotStore>,
    topology: Box<dyn TopologyProvider>,
    initialized: AtomicBool,
    unused: AtomicBool,
    state: Mutex<RouteState>,
}

impl RouteManager {
    /// Create an uninitialized manager. Until [`load`](Self::load) runs,
    /// every mutator is a no-op.
    #[must_use]
    pub fn new(
        backend: impl RouteBackend + 'static,
        store: impl RouteSnapshotStore + 'static,
        topology: impl TopologyProvider + 'static,
    ) -> Self {
        Self {
            backend: Box::new(backend),
            store: Box::new(store),
            topology: Box::new(topology),
            initialized: AtomicBool::new(false),
            unused: AtomicBool::new(true),
            state: Mutex::new(RouteState::default()),
        }
    }

    /// Resolve the interface and restore the persisted table.
    ///
    /// A snapshot on disk means the platform was started when the previous
    /// daemon exited, so its routes are presumed applied. A missing snapshot
    /// means stopped; a corrupt one is reported and treated as stopped.
    pub async fn load(&self, settings: RouteSettings) {
        let mut state = self.state.lock().await;
        state.local_name = settings.local_name.trim().to_lowercase();
        state.instance = settings.instance;
        state.is_workstation = settings.is_workstation;
        state.iface = self.resolve_interface(settings.interface.as_deref()).await;

        match self.store.load(&settings.cache_dir).await {
            Ok(Some(snapshot)) => {
                state.table = snapshot.into_table();
                state.started = true;
                debug!(hosts = state.table.len(), "route list restored, platform presumed started");
            }
            Ok(None) => {
                state.table = RouteTable::default();
                state.started = false;
                debug!("no route snapshot, platform presumed stopped");
            }
            Err(e) => {
                state.table = RouteTable::default();
                state.started = false;
                error!(error = ?e, "unable to load the route list");
            }
        }
        state.cache_dir = Some(settings.cache_dir);

        // workstations never receive START
        if settings.is_workstation {
            state.started = true;
        }
        self.unused.store(false, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
    }

    /// For roles that never route: initialized, and every mutator succeeds
    /// without doing anything.
    pub fn mark_unused(&self) {
        self.initialized.store(true, Ordering::SeqCst);
        self.unused.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_unused(&self) -> bool {
        self.unused.load(Ordering::SeqCst)
    }

    /// Whether routes are currently applied to the kernel.
    pub async fn is_started(&self) -> bool {
        self.state.lock().await.started
    }

    /// Copy of the current table.
    pub async fn routes(&self) -> RouteTable {
        self.state.lock().await.table.clone()
    }

    /// Record a peer host announced by discovery and, when the platform is
    /// started, apply its routes right away.
    ///
    /// # Errors
    ///
    /// Returns the kernel error when a route cannot be applied. The entry of
    /// the failing family is rolled back; a family applied before the failure
    /// is kept.
    pub async fn add_distant_host(&self, host: &DistantHost) -> Result<()> {
        if self.is_unused() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        info!(host = %host.name, v4 = ?host.v4, v6 = ?host.v6, "new distant host");
        if host.gw_v4.is_some() || host.gw_v6.is_some() {
            debug!(gw_v4 = ?host.gw_v4, gw_v6 = ?host.gw_v6, "routers");
        }
        if state.is_local(&host.name) {
            warn!(host = %host.name, "refusing route toward this host");
            return Ok(());
        }

        let next = host.routes();
        if !state.started {
            state.table.insert(&host.name, next);
            return Ok(());
        }

        // a re-announce may move the host: the old prefixes leave the kernel
        let stale = state.table.get(&host.name).superseded_by(&next);
        if !stale.is_empty() {
            debug!(
                host = %host.name,
                v4 = ?stale.v4,
                v6 = ?stale.v6,
                "host moved, withdraw previous routes"
            );
            if let Err(e) = self.withdraw(&state, &host.name, &stale).await {
                warn!(host = %host.name, error = %e, "previous routes were not fully removed");
            }
        }
        state.table.insert(&host.name, next);

        debug!(host = %host.name, "platform is started, add a route for this host");
        let applied = self.apply_host(&mut state, &host.name).await;
        self.persist(&state).await;
        applied.map_err(Into::into)
    }

    /// Forget a peer host, withdrawing its routes when the platform is
    /// started. Unknown hosts are ignored.
    pub async fn remove_distant_host(&self, name: &str) {
        if self.is_unused() {
            return;
        }
        let mut state = self.state.lock().await;
        debug!(host = name, "remove distant host");
        if !state.table.contains(name) {
            return;
        }
        if state.started {
            debug!(host = name, "platform is started, remove the routes for this host");
            if let Err(e) = self.withdraw_host(&state, name).await {
                warn!(host = name, error = %e, "routes were not fully removed");
            }
            state.table.remove(name);
            self.persist(&state).await;
        } else {
            state.table.remove(name);
        }
    }

    /// Apply the routes of every peer in this gateway's spot. Called on START.
    ///
    /// # Errors
    ///
    /// Fails when the topology cannot be read or a route cannot be applied.
    /// Routes applied before the failure stay applied.
    pub async fn setup_routes(&self, iface: Option<&str>) -> Result<()> {
        if self.is_unused() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        if let Some(iface) = iface {
            state.iface = self.resolve_interface(Some(iface)).await;
        }
        let topology = self.topology.topology().await?;
        let local_gw = topology.gateway_of(&state.instance).to_string();

        state.started = true;
        info!(gateway = %local_gw, "set routes before starting platform");
        self.persist(&state).await;

        let before = state.table.clone();
        let mut outcome = Ok(());
        for host in state.table.hosts() {
            if topology.gateway_of_host(&host) != local_gw {
                debug!(host = %host, "host belongs to another spot, skip");
                continue;
            }
            if let Err(e) = self.apply_host(&mut state, &host).await {
                outcome = Err(e);
                break;
            }
        }
        if state.table != before {
            self.persist(&state).await;
        }
        outcome.map_err(Into::into)
    }

    /// Withdraw the routes of every peer in this gateway's spot and drop the
    /// snapshot. Called on STOP.
    ///
    /// Group membership is evaluated against the topology as it is now, so a
    /// route added under a different assignment is not withdrawn. The
    /// platform counts as stopped and the snapshot is dropped even when the
    /// topology cannot be read.
    ///
    /// # Errors
    ///
    /// Fails when the topology cannot be read, or with the first kernel error
    /// after every other route has been attempted.
    pub async fn remove_routes(&self) -> Result<()> {
        if self.is_unused() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        state.started = false;
        let outcome = match self.topology.topology().await {
            Ok(topology) => {
                let local_gw = topology.gateway_of(&state.instance).to_string();
                info!(gateway = %local_gw, "remove routes after stopping platform");
                let mut first_err = None;
                for host in state.table.hosts() {
                    if topology.gateway_of_host(&host) != local_gw {
                        continue;
                    }
                    if let Err(e) = self.withdraw_host(&state, &host).await {
                        first_err.get_or_insert(e);
                    }
                }
                first_err.map_or(Ok(()), |e| Err(e.into()))
            }
            Err(e) => {
                error!(error = ?e, "cannot read topology, applied routes are left in place");
                Err(e)
            }
        };
        if let Some(dir) = state.cache_dir.as_deref() {
            if let Err(e) = self.store.clear(dir).await {
                warn!(error = ?e, "unable to delete the route snapshot");
            }
        }
        outcome
    }

    /// Teardown for a workstation exiting: its routes are never withdrawn by
    /// STOP, so every applied route goes here. Other roles are untouched.
    ///
    /// # Errors
    ///
    /// Returns the first kernel error after every route has been attempted.
    pub async fn delete(&self) -> Result<()> {
        if self.is_unused() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        if !state.is_workstation || !state.started {
            return Ok(());
        }
        info!("remove workstation routes");
        let mut first_err = None;
        for host in state.table.hosts() {
            if let Err(e) = self.withdraw_host(&state, &host).await {
                first_err.get_or_insert(e);
            }
        }
        state.started = false;
        first_err.map_or(Ok(()), |e| Err(e.into()))
    }

    async fn resolve_interface(&self, iface: Option<&str>) -> Option<String> {
        let Some(iface) = iface else {
            error!("no routing interface configured, routes will not be applied");
            return None;
        };
        if self.backend.interface_exists(iface).await {
            Some(iface.to_string())
        } else {
            error!(iface, "unable to find interface, routes will not be applied");
            None
        }
    }

    /// Install the stored routes of `host`. A family the kernel rejects is
    /// removed from the table before the error is returned.
    async fn apply_host(&self, state: &mut RouteState, host: &str) -> Result<(), RouteError> {
        if state.is_local(host) {
            warn!(host, "try to add route for myself, entry purged");
            state.table.remove(host);
            return Ok(());
        }
        let routes = state.table.get(host);
        let Some(iface) = state.iface.clone() else {
            warn!(host, "no routing interface, route not applied");
            return Ok(());
        };
        info!(host, v4 = ?routes.v4, v6 = ?routes.v6, iface = %iface, "add routes");

        for family in [Family::V4, Family::V6] {
            let Some(entry) = routes.get(family) else {
                continue;
            };
            match self.backend.add(&iface, entry).await {
                Ok(()) => {}
                Err(RouteError::Exists { .. }) => {
                    info!(host, family = family.label(), "route already exists");
                }
                Err(e) => {
                    error!(host, family = family.label(), error = %e, "fail to add route");
                    state.table.remove_family(host, family);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Remove the applied routes of `host`. Both families are attempted even
    /// when the first one fails; routes already gone count as removed.
    async fn withdraw_host(&self, state: &RouteState, host: &str) -> Result<(), RouteError> {
        self.withdraw(state, host, &state.table.get(host)).await
    }

    async fn withdraw(
        &self,
        state: &RouteState,
        host: &str,
        routes: &HostRoutes,
    ) -> Result<(), RouteError> {
        let Some(iface) = state.iface.as_deref() else {
            return Ok(());
        };
        info!(host, v4 = ?routes.v4, v6 = ?routes.v6, iface, "remove routes");

        let mut first_err = None;
        for family in [Family::V4, Family::V6] {
            let Some(entry) = routes.get(family) else {
                continue;
            };
            match self.backend.delete(iface, entry).await {
                Ok(()) => {}
                Err(RouteError::Missing { .. }) => {
                    info!(host, family = family.label(), "route already deleted");
                }
                Err(e) => {
                    error!(host, family = family.label(), error = %e, "fail to delete route");
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Write the snapshot. Failures are logged; the in-memory table stays the
    /// source of truth.
    async fn persist(&self, state: &RouteState) {
        if state.is_workstation {
            return;
        }
        let Some(dir) = state.cache_dir.as_deref() else {
            return;
        };
        let snapshot = RouteSnapshot::capture(&state.table);
        if let Err(e) = self.store.save(dir, &snapshot).await {
            error!(error = ?e, "unable to serialize route list");
        }
    }
}
