//! Domain types and validators for the daemon configuration.
//!
//! Pure functions only: no I/O or async.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

// ── Config schema ────────────────────────────────────────────────────────────

/// Role of this host in the emulated platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Gateway,
    #[default]
    Terminal,
    /// Forwards traffic at layer 2 and never needs host routes.
    Satellite,
    /// Traffic endpoint behind a terminal; never receives `START`.
    Workstation,
}

impl Role {
    #[must_use]
    pub fn needs_routes(self) -> bool {
        self != Self::Satellite
    }

    #[must_use]
    pub fn is_workstation(self) -> bool {
        self == Self::Workstation
    }
}

/// One binary the supervisor must run while the platform is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinarySpec {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Top-level configuration stored in `/etc/sand-daemon/daemon.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Canonical name of this host, as announced to peers.
    pub name: String,
    /// Instance id looked up in the topology.
    #[serde(default = "default_instance")]
    pub instance: String,
    #[serde(default)]
    pub role: Role,
    /// Emulation network interface routes are applied on.
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_topology_file")]
    pub topology_file: PathBuf,
    #[serde(default = "default_deploy_dir")]
    pub deploy_dir: PathBuf,
    #[serde(default = "default_test_result_file")]
    pub test_result_file: PathBuf,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default)]
    pub binaries: Vec<BinarySpec>,
}

fn default_instance() -> String {
    "0".to_string()
}

fn default_listen() -> String {
    format!("0.0.0.0:{}", sand_common::DEFAULT_COMMAND_PORT)
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/var/cache/sand-daemon")
}

fn default_topology_file() -> PathBuf {
    PathBuf::from("/etc/opensand/topology.conf")
}

fn default_deploy_dir() -> PathBuf {
    PathBuf::from("/etc/opensand")
}

fn default_test_result_file() -> PathBuf {
    PathBuf::from("/tmp/opensand_tests/result")
}

fn default_read_timeout_secs() -> u64 {
    60
}

impl DaemonConfig {
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Normalize fields that are matched case-insensitively.
    pub fn normalize(&mut self) {
        self.name = self.name.trim().to_lowercase();
    }
}

// ── Validators ───────────────────────────────────────────────────────────────

/// Validates a loaded configuration.
pub fn validate_config(config: &DaemonConfig) -> Result<(), ConfigError> {
    if config.name.trim().is_empty() {
        return Err(ConfigError::Invalid("name must not be empty".to_string()));
    }
    if config.read_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "read_timeout_secs must be greater than zero".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for binary in &config.binaries {
        if !seen.insert(binary.name.as_str()) {
            return Err(ConfigError::DuplicateBinary(binary.name.clone()));
        }
    }
    Ok(())
}

// ── Unit tests ───────────────────────────────────────────────────────────────
