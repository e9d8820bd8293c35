//! Typed domain error enums.
//!
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator. The connection handler walks the `anyhow` chain with
//! `downcast_ref` to pick the single `ERROR` line it replies with.

use std::path::PathBuf;
use std::time::Duration;

use ipnet::IpNet;
use thiserror::Error;

use sand_common::ProtocolError;

// ── Session errors ────────────────────────────────────────────────────────────

/// Errors raised while talking to the manager over one connection.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no data received within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("distant socket is closed")]
    PeerClosed,

    #[error("daemon is shutting down")]
    Shutdown,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("{file} is not a valid XML document: {reason}")]
    Xml { file: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ── Route errors ──────────────────────────────────────────────────────────────

/// Outcome of a kernel route operation that did not succeed outright.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The kernel already holds this route.
    #[error("route toward {network} already exists")]
    Exists { network: IpNet },

    /// The route is not present in the kernel.
    #[error("route toward {network} does not exist")]
    Missing { network: IpNet },

    /// The kernel rejected the operation.
    #[error("cannot apply route toward {network}: {reason}")]
    Apply { network: IpNet, reason: String },
}

// ── Topology errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("cannot read topology file {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("invalid topology document: {0}")]
    Invalid(String),

    #[error("topology has no gw_table")]
    MissingGatewayTable,
}

// ── Supervisor errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("some process are already started")]
    AlreadyRunning,

    #[error("process list is not initialized")]
    NotInitialized,

    #[error("cannot launch {binary}")]
    Launch {
        binary: String,
        #[source]
        source: std::io::Error,
    },
}

// ── Persistence errors ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("cannot encode {what}: {reason}")]
    Encode { what: &'static str, reason: String },

    #[error("cannot decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
}

// ── Config errors ─────────────────────────────────────────────────────────────

/// Errors related to the daemon configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot parse configuration {path}: {reason}")]
    Unparseable { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("duplicate binary name '{0}'")]
    DuplicateBinary(String),
}
