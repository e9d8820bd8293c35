//! On-disk state kept in the cache directory.
//!
//! Two files live there: `routes`, the route snapshot written while the
//! platform is started, and `processes`, the pids of the binaries the
//! supervisor launched. Both are JSON, written atomically (temp file +
//! rename) with `0600` permissions, and read on the blocking pool.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::application::ports::RouteSnapshotStore;
use crate::domain::{PersistenceError, RouteSnapshot};

/// File name of the route snapshot inside the cache directory.
pub const ROUTES_FILE: &str = "routes";
/// File name of the supervised pid list inside the cache directory.
pub const PROCESSES_FILE: &str = "processes";

/// Read and decode `path`, `Ok(None)` when it does not exist.
fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("reading {}", path.display()));
        }
    };
    let value = serde_json::from_str(&content).map_err(|e| PersistenceError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(Some(value))
}

/// Encode `value` and atomically replace `path` with it.
fn save_json<T: Serialize>(path: &Path, what: &'static str, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(value).map_err(|e| PersistenceError::Encode {
        what,
        reason: e.to_string(),
    })?;

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);
    std::fs::write(&temp_path, &content)
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("setting permissions on {}", temp_path.display()))?;
    }

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("finalizing {}", path.display()))?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}

// ── Route snapshot ────────────────────────────────────────────────────────────

/// Production `RouteSnapshotStore`: `<cache_dir>/routes`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRouteSnapshotStore;

#[async_trait]
impl RouteSnapshotStore for JsonRouteSnapshotStore {
    async fn load(&self, cache_dir: &Path) -> Result<Option<RouteSnapshot>> {
        let path = cache_dir.join(ROUTES_FILE);
        tokio::task::spawn_blocking(move || load_json(&path))
            .await
            .context("route snapshot load task panicked")?
    }

    async fn save(&self, cache_dir: &Path, snapshot: &RouteSnapshot) -> Result<()> {
        let path = cache_dir.join(ROUTES_FILE);
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || save_json(&path, "route list", &snapshot))
            .await
            .context("route snapshot save task panicked")?
    }

    async fn clear(&self, cache_dir: &Path) -> Result<()> {
        let path = cache_dir.join(ROUTES_FILE);
        tokio::task::spawn_blocking(move || remove_if_present(&path))
            .await
            .context("route snapshot clear task panicked")?
    }
}

// ── Process list ──────────────────────────────────────────────────────────────

/// Pids of the binaries launched by the supervisor: `<cache_dir>/processes`.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    #[must_use]
    pub fn in_dir(cache_dir: &Path) -> Self {
        Self {
            path: cache_dir.join(PROCESSES_FILE),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// # Errors
    ///
    /// Fails when the file exists but cannot be read or decoded.
    pub async fn load(&self) -> Result<Vec<u32>> {
        let path = self.path.clone();
        let pids = tokio::task::spawn_blocking(move || load_json::<Vec<u32>>(&path))
            .await
            .context("process list load task panicked")??;
        Ok(pids.unwrap_or_default())
    }

    /// # Errors
    ///
    /// Fails when the file cannot be written.
    pub async fn save(&self, pids: &[u32]) -> Result<()> {
        let path = self.path.clone();
        let pids = pids.to_vec();
        tokio::task::spawn_blocking(move || save_json(&path, "process list", &pids))
            .await
            .context("process list save task panicked")?
    }

    /// # Errors
    ///
    /// Fails when the file exists but cannot be removed.
    pub async fn clear(&self) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || remove_if_present(&path))
            .await
            .context("process list clear task panicked")?
    }
}
