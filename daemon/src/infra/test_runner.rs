//! Ad-hoc test commands sent with `TEST`.
//!
//! Output of every run is appended to one result file, each run preceded by
//! an empty line. A run is abandoned (and its process killed) as soon as the
//! daemon shuts down.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sand_common::TestRequest;

/// How a test run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    /// Exit code, or the negated signal number when killed by a signal.
    Exited(i32),
    /// The daemon is shutting down; no reply must be sent.
    Cancelled,
}

pub struct TestRunner {
    result_file: PathBuf,
    cancel: CancellationToken,
}

impl TestRunner {
    #[must_use]
    pub fn new(result_file: PathBuf, cancel: CancellationToken) -> Self {
        Self {
            result_file,
            cancel,
        }
    }

    /// Run `request` to completion or until shutdown.
    ///
    /// # Errors
    ///
    /// Fails when the result file cannot be prepared or the program cannot
    /// be spawned. A non-zero exit is an outcome, not an error.
    pub async fn run(&self, request: &TestRequest) -> Result<TestOutcome> {
        let log = self.open_result_file().await?;
        let program = Path::new(request.program());
        make_user_executable(program).await;

        let mut command = tokio::process::Command::new(program);
        command
            .args(request.args())
            .stdin(Stdio::null())
            .stdout(Stdio::from(
                log.try_clone().context("cannot duplicate result file handle")?,
            ))
            .stderr(Stdio::from(log))
            .kill_on_drop(true);
        if let Some(dir) = program.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        info!(command = %request.command_line, "launch test");
        let mut child = command
            .spawn()
            .with_context(|| format!("cannot launch test {}", program.display()))?;

        tokio::select! {
            () = self.cancel.cancelled() => {
                warn!(command = %request.command_line, "shutdown requested, kill test");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "cannot kill test process");
                }
                Ok(TestOutcome::Cancelled)
            }
            status = child.wait() => {
                let status = status.context("waiting for test process")?;
                let code = exit_code(status);
                debug!(command = %request.command_line, code, "test finished");
                Ok(TestOutcome::Exited(code))
            }
        }
    }

    async fn open_result_file(&self) -> Result<std::fs::File> {
        if let Some(dir) = self.result_file.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating directory {}", dir.display()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.result_file)
            .await
            .with_context(|| format!("opening {}", self.result_file.display()))?;
        file.write_all(b"\n")
            .await
            .with_context(|| format!("writing {}", self.result_file.display()))?;
        file.flush().await?;
        Ok(file.into_std().await)
    }
}

/// Add the owner `rwx` bits to a program given by path. Bare names are
/// looked up in `PATH` and left alone.
async fn make_user_executable(program: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if program.components().count() < 2 {
            return;
        }
        let Ok(metadata) = tokio::fs::metadata(program).await else {
            return;
        };
        let mode = metadata.permissions().mode();
        if mode & 0o700 == 0o700 {
            return;
        }
        let permissions = std::fs::Permissions::from_mode(mode | 0o700);
        if let Err(e) = tokio::fs::set_permissions(program, permissions).await {
            warn!(program = %program.display(), error = %e, "cannot make test executable");
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}
