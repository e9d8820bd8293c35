//! `CommandRunner` backed by `tokio::process`.

use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::application::ports::CommandRunner;

/// Default timeout for short host tools (`ip`, `kill`).
pub const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a tool with a deadline. A tool still running at the deadline is
/// dropped together with its child handle, which kills it.
pub struct TokioCommandRunner {
    timeout: Duration,
}

impl TokioCommandRunner {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TokioCommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CMD_TIMEOUT)
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<Output> {
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.with_context(|| format!("waiting for {program}")),
            Err(_) => {
                warn!(program, ?args, "tool timed out, killed");
                anyhow::bail!("{program} timed out after {}s", self.timeout.as_secs())
            }
        }
    }
}
