use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{GuardError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stderr, or stdout when stderr is empty (netsh reports most
    /// errors on stdout).
    pub fn detail(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

pub trait CommandExecutor: Send + Sync {
    /// Runs `program` with `args` and waits for it to exit. A non-zero exit is
    /// reported in the output, not as an error.
    fn execute(
        &self,
        program: &str,
        args: &str,
    ) -> impl Future<Output = Result<CommandOutput>> + Send;
}

impl<T: CommandExecutor> CommandExecutor for Arc<T> {
    fn execute(
        &self,
        program: &str,
        args: &str,
    ) -> impl Future<Output = Result<CommandOutput>> + Send {
        (**self).execute(program, args)
    }
}

/// Spawns a real child process with a bounded wait.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    timeout: Duration,
}

impl ProcessExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command(program: &str, args: &str) -> Command {
        let mut cmd = Command::new(program);

        #[cfg(windows)]
        {
            // netsh parses its own command line; pass it through untouched.
            cmd.raw_arg(args);
        }

        #[cfg(not(windows))]
        {
            cmd.args(crate::netsh::split_args(args));
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, program: &str, args: &str) -> Result<CommandOutput> {
        debug!(program, args, "executing");

        let child = Self::command(program, args).spawn()?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| GuardError::CommandTimeout {
                program: program.to_string(),
                timeout: self.timeout,
            })??;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
