//! Loading of the daemon configuration and of the topology descriptor.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::application::ports::TopologyProvider;
use crate::domain::{ConfigError, DaemonConfig, Topology, TopologyError, validate_config};

/// Read, normalize and validate the YAML configuration at `path`.
///
/// # Errors
///
/// Fails when the file cannot be read, is not valid YAML, or does not
/// validate.
pub fn load_config(path: &Path) -> Result<DaemonConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let mut config: DaemonConfig =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Unparseable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    config.normalize();
    validate_config(&config)?;
    Ok(config)
}

/// `TopologyProvider` reading the descriptor file on every call, so an
/// updated topology deployed through `CONFIGURE` is picked up on the next
/// `START`.
#[derive(Debug, Clone)]
pub struct TopologyFile {
    path: PathBuf,
}

impl TopologyFile {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl TopologyProvider for TopologyFile {
    async fn topology(&self) -> Result<Topology> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| TopologyError::Unreadable {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        Ok(Topology::parse(&content)?)
    }
}
