//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain`, never from `crate::infra`
//! or `crate::server`.
//!
//! Every port is shared between connection tasks, so implementations are
//! `Send + Sync` and their futures are `Send` (`async_trait`).

use std::path::Path;
use std::process::Output;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{RouteEntry, RouteError, RouteSnapshot, Topology};

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Runs the short host tools (`ip`, `kill`) the daemon drives.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a program to completion and capture its output.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or outlives the
    /// runner's timeout, in which case it is killed.
    async fn run(&self, program: &str, args: &[String]) -> Result<Output>;
}

// ── Routing Ports ─────────────────────────────────────────────────────────────

/// Kernel routing table access.
#[async_trait]
pub trait RouteBackend: Send + Sync {
    /// Whether `iface` names an existing network interface.
    async fn interface_exists(&self, iface: &str) -> bool;
    /// Install `route` on `iface`.
    async fn add(&self, iface: &str, route: &RouteEntry) -> Result<(), RouteError>;
    /// Remove `route` from `iface`.
    async fn delete(&self, iface: &str, route: &RouteEntry) -> Result<(), RouteError>;
}

/// Persistence of the route table across daemon restarts.
#[async_trait]
pub trait RouteSnapshotStore: Send + Sync {
    /// Load the snapshot kept in `cache_dir`, `None` when there is none.
    async fn load(&self, cache_dir: &Path) -> Result<Option<RouteSnapshot>>;
    /// Replace the snapshot kept in `cache_dir`.
    async fn save(&self, cache_dir: &Path, snapshot: &RouteSnapshot) -> Result<()>;
    /// Delete the snapshot; a missing file is not an error.
    async fn clear(&self, cache_dir: &Path) -> Result<()>;
}

/// Source of the gateway/terminal topology, read fresh on every use.
#[async_trait]
pub trait TopologyProvider: Send + Sync {
    async fn topology(&self) -> Result<Topology>;
}

// ── Supervisor Port ───────────────────────────────────────────────────────────

/// Lifecycle of the binaries this host runs for the platform.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Whether the binary list has been loaded.
    fn is_initialized(&self) -> bool;
    /// Whether the managed binaries are currently active.
    fn is_running(&self) -> bool;
    /// Launch every configured binary.
    ///
    /// # Errors
    ///
    /// `SupervisorError::AlreadyRunning` when already started; the launch
    /// error otherwise, in which case nothing is left running.
    async fn start(&self) -> Result<()>;
    /// Terminate the managed binaries. A no-op when not running.
    async fn stop(&self) -> Result<()>;
}
