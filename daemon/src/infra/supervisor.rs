//! Production `Supervisor`: runs the configured platform binaries.
//!
//! Launched pids are written to the cache directory so that a restarted
//! daemon still reports the platform as running and can terminate binaries
//! spawned by its predecessor.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::application::ports::{CommandRunner, Supervisor};
use crate::domain::{BinarySpec, SupervisorError};
use crate::infra::state::PidFile;

#[derive(Default)]
struct Processes {
    /// Binaries spawned by this daemon.
    children: Vec<(String, Child)>,
    /// Pids restored from a previous daemon.
    inherited: Vec<u32>,
}

pub struct ProcessSupervisor<R: CommandRunner> {
    binaries: Vec<BinarySpec>,
    pid_file: PidFile,
    runner: R,
    initialized: AtomicBool,
    running: AtomicBool,
    processes: Mutex<Processes>,
}

impl<R: CommandRunner> ProcessSupervisor<R> {
    /// `runner` is used to signal inherited pids.
    #[must_use]
    pub fn new(binaries: Vec<BinarySpec>, pid_file: PidFile, runner: R) -> Self {
        Self {
            binaries,
            pid_file,
            runner,
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            processes: Mutex::new(Processes::default()),
        }
    }

    /// Restore the pid list left by a previous daemon and mark the
    /// supervisor initialized.
    ///
    /// # Errors
    ///
    /// Fails when the pid file exists but cannot be decoded; the supervisor
    /// then stays uninitialized.
    pub async fn load(&self) -> Result<()> {
        let pids = self
            .pid_file
            .load()
            .await
            .context("cannot restore the process list")?;
        let mut processes = self.processes.lock().await;
        if !pids.is_empty() {
            info!(?pids, "processes from a previous run, platform presumed started");
            self.running.store(true, Ordering::SeqCst);
        }
        processes.inherited = pids;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn spawn(binary: &BinarySpec) -> Result<Child, SupervisorError> {
        debug!(name = %binary.name, path = %binary.path.display(), args = ?binary.args, "launch binary");
        tokio::process::Command::new(&binary.path)
            .args(&binary.args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| SupervisorError::Launch {
                binary: binary.name.clone(),
                source,
            })
    }

    async fn kill_children(children: &mut Vec<(String, Child)>) {
        for (name, mut child) in children.drain(..) {
            if let Err(e) = child.kill().await {
                warn!(name = %name, error = %e, "cannot kill process");
            } else {
                debug!(name = %name, "process stopped");
            }
        }
    }

    async fn terminate_inherited(&self, pids: &mut Vec<u32>) {
        for pid in pids.drain(..) {
            let args = ["-TERM".to_string(), pid.to_string()];
            match self.runner.run("kill", &args).await {
                Ok(output) if output.status.success() => debug!(pid, "process terminated"),
                Ok(output) => warn!(
                    pid,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "cannot terminate process"
                ),
                Err(e) => warn!(pid, error = ?e, "cannot terminate process"),
            }
        }
    }
}

#[async_trait]
impl<R: CommandRunner> Supervisor for ProcessSupervisor<R> {
    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn start(&self) -> Result<()> {
        if !self.is_initialized() {
            return Err(SupervisorError::NotInitialized.into());
        }
        let mut processes = self.processes.lock().await;
        if self.is_running() {
            return Err(SupervisorError::AlreadyRunning.into());
        }

        for binary in &self.binaries {
            match Self::spawn(binary) {
                Ok(child) => processes.children.push((binary.name.clone(), child)),
                Err(e) => {
                    error!(error = %e, "launch failed, stopping the binaries already started");
                    Self::kill_children(&mut processes.children).await;
                    return Err(e.into());
                }
            }
        }

        let pids: Vec<u32> = processes
            .children
            .iter()
            .filter_map(|(_, child)| child.id())
            .collect();
        if let Err(e) = self.pid_file.save(&pids).await {
            Self::kill_children(&mut processes.children).await;
            return Err(e);
        }
        info!(count = pids.len(), "platform binaries started");
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut processes = self.processes.lock().await;
        if !self.is_running() {
            return Ok(());
        }
        Self::kill_children(&mut processes.children).await;
        let mut inherited = std::mem::take(&mut processes.inherited);
        self.terminate_inherited(&mut inherited).await;
        self.running.store(false, Ordering::SeqCst);
        info!("platform binaries stopped");
        self.pid_file
            .clear()
            .await
            .context("cannot delete the process list")
    }
}
