//! Git plumbing wrapper for LumenFlow.
//!
//! Every operation the coordinator needs out of git — worktrees, branches,
//! pushes, fast-forwards, diffs — goes through [`GitRepo`], implemented as
//! `std::process::Command` invocations of the `git` CLI.

pub mod error;
pub mod repo;
pub mod retry;

pub use error::GitError;
pub use repo::{ChangeKind, DiffEntry, GitRepo};
pub use retry::{retry_git, BackoffPolicy};
