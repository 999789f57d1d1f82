//! Process invocation plumbing.
//!
//! Every external tool the agent drives (`mount`, `fuser`, `multipath`,
//! `dmsetup`, `iscsiadm`, ...) goes through a [`CommandRunner`] so the
//! collaborators built on top of it can be exercised without a real host.

use std::process::{Command, Output};

use tracing::trace;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output carrying `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with exit status 1 and the given `stderr`.
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(1),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Render a failure message for a command that did not succeed.
    pub fn failure_message(&self, context: &str) -> String {
        let stderr = self.stderr.trim();
        match self.code {
            Some(code) if stderr.is_empty() => format!("{context}: exit status {code}"),
            Some(code) => format!("{context}: exit status {code}: {stderr}"),
            None => format!("{context}: terminated by signal"),
        }
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Runs an external program to completion.
///
/// No timeout is applied; a caller that needs one wraps the whole operation.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput>;
}

/// [`CommandRunner`] backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput> {
        trace!(program = %program, args = ?args, "Executing command");
        let output = Command::new(program).args(args).output()?;
        Ok(output.into())
    }
}
