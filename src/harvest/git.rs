//! [`CloneTool`] backed by the `git` command-line client.

use crate::harvest::traits::{CloneError, CloneTool};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::runtime::{Builder, Handle};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    /// Kills any single invocation that runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs one invocation to completion.
    ///
    /// Called from blocking threads (`spawn_blocking`), where it borrows the
    /// ambient runtime; outside a runtime it starts a private one.
    fn run(&self, args: &[&str], cwd: Option<&Path>) -> Result<(), CloneError> {
        match Handle::try_current() {
            Ok(handle) => handle.block_on(self.invoke(args, cwd)),
            Err(_) => Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(CloneError::Spawn)?
                .block_on(self.invoke(args, cwd)),
        }
    }

    async fn invoke(&self, args: &[&str], cwd: Option<&Path>) -> Result<(), CloneError> {
        let command = format!("{} {}", self.program.display(), args.join(" "));
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        debug!(%command, "Running");
        let child = cmd.spawn().map_err(CloneError::Spawn)?;

        // Dropping the pending output on timeout kills the child.
        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => {
                    return Err(CloneError::TimedOut {
                        command,
                        timeout_secs: limit.as_secs(),
                    })
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(CloneError::Spawn)?;

        if output.status.success() {
            Ok(())
        } else {
            Err(CloneError::ToolFailed {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl CloneTool for GitCli {
    fn clone_repo(&self, url: &str, dir: &Path) -> Result<(), CloneError> {
        let target = dir.to_string_lossy();
        self.run(&["clone", "--quiet", url, target.as_ref()], None)
    }

    fn checkout_branch(&self, dir: &Path, branch: &str) -> Result<(), CloneError> {
        self.run(&["checkout", "--quiet", branch], Some(dir))
    }

    fn sync_submodules(&self, dir: &Path) -> Result<(), CloneError> {
        self.run(
            &["submodule", "update", "--init", "--recursive", "--quiet"],
            Some(dir),
        )
    }
}
