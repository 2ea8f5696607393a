//! Error type for git plumbing operations.

use thiserror::Error;

/// Errors from shelling out to the `git` CLI.
#[derive(Debug, Error)]
pub enum GitError {
    /// A `git` subcommand exited non-zero.
    #[error("`{command}` failed{}", command_suffix(*exit_code, stderr))]
    Command {
        /// The full command line, e.g. `"git worktree add ..."`.
        command: String,
        /// Captured stderr, trimmed.
        stderr: String,
        /// Process exit code, `None` if killed by signal.
        exit_code: Option<i32>,
    },
    /// The `git` binary could not be spawned, or another I/O error occurred.
    #[error("failed to run git: {0}")]
    Io(#[from] std::io::Error),
}

fn command_suffix(exit_code: Option<i32>, stderr: &str) -> String {
    let mut suffix = String::new();
    if let Some(code) = exit_code {
        suffix.push_str(&format!(" (exit code {code})"));
    }
    if !stderr.is_empty() {
        suffix.push_str(&format!(": {stderr}"));
    }
    suffix
}

impl GitError {
    /// `true` for errors that are plausibly transient (network/remote
    /// unavailability) and worth retrying with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::Command { command, stderr, .. } => {
                let transient_commands =
                    command.contains("push") || command.contains("fetch") || command.contains("clone");
                let transient_stderr = stderr.contains("Could not resolve host")
                    || stderr.contains("Connection timed out")
                    || stderr.contains("unable to access")
                    || stderr.contains("early EOF")
                    || stderr.contains("RPC failed");
                transient_commands && transient_stderr
            }
        }
    }
}
