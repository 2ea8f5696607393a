//! Thin wrapper over the `git` CLI.
//!
//! Every mutating operation the coordinator needs — creating and tearing
//! down worktrees, branches, pushes, fast-forwards, diffs — goes through
//! here as a `std::process::Command` invocation. No git plumbing is
//! reimplemented; this module only shapes `git`'s stdout/stderr into typed
//! results.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::GitError;

/// The kind of change a path underwent between two revisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// Added since the base revision.
    Added,
    /// Modified since the base revision.
    Modified,
    /// Deleted since the base revision.
    Deleted,
    /// Renamed (only seen when rename detection is enabled).
    Renamed,
    /// Any other git status letter (copied, type-changed, unmerged, ...).
    Other(char),
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Modified => write!(f, "modified"),
            Self::Deleted => write!(f, "deleted"),
            Self::Renamed => write!(f, "renamed"),
            Self::Other(c) => write!(f, "other({c})"),
        }
    }
}

impl From<char> for ChangeKind {
    fn from(c: char) -> Self {
        match c {
            'A' => Self::Added,
            'M' => Self::Modified,
            'D' => Self::Deleted,
            'R' => Self::Renamed,
            other => Self::Other(other),
        }
    }
}

/// A single entry from `git diff --name-status`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffEntry {
    /// How the path changed.
    pub kind: ChangeKind,
    /// Path relative to the repository root.
    pub path: String,
}

/// A handle onto a git repository, rooted at `root`.
///
/// `root` is the path passed as `--git-dir`'s implicit working directory
/// (i.e. `current_dir` for every invocation unless a specific worktree
/// directory is passed explicitly).
#[derive(Clone, Debug)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    /// Create a handle for the repository rooted at `root`.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The repository root this handle operates on.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(GitError::Io)?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(GitError::Command {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
                exit_code: output.status.code(),
            })
        }
    }

    fn run_here(&self, args: &[&str]) -> Result<String, GitError> {
        self.run(&self.root, args)
    }

    /// Resolve `rev` to a full 40-character object id.
    pub fn rev_parse(&self, rev: &str) -> Result<String, GitError> {
        Ok(self.run_here(&["rev-parse", rev])?.trim().to_owned())
    }

    /// `git fetch <remote> <refspec>`.
    pub fn fetch(&self, remote: &str, refspec: &str) -> Result<(), GitError> {
        self.run_here(&["fetch", remote, refspec]).map(drop)
    }

    /// Create a new branch `branch` at `start_point` and add a worktree for
    /// it at `path`, in one step (`git worktree add -b`).
    pub fn worktree_add_new_branch(
        &self,
        path: &Path,
        branch: &str,
        start_point: &str,
    ) -> Result<(), GitError> {
        let path_str = path.to_string_lossy().into_owned();
        self.run_here(&["worktree", "add", "-b", branch, &path_str, start_point])
            .map(drop)
    }

    /// Check out a new branch `branch` from `start_point` directly in the
    /// checkout at `dir`, with no separate worktree — used for
    /// branch-only/branch-pr claims.
    pub fn checkout_new_branch(&self, dir: &Path, branch: &str, start_point: &str) -> Result<(), GitError> {
        self.run(dir, &["checkout", "-b", branch, start_point]).map(drop)
    }

    /// Add a worktree for an existing branch at `path` (`git worktree add`,
    /// no `-b`) — used to get a working copy of a branch a prior claim
    /// already created, without forking yet another throwaway branch off
    /// it.
    pub fn worktree_add_existing(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        let path_str = path.to_string_lossy().into_owned();
        self.run_here(&["worktree", "add", &path_str, branch]).map(drop)
    }

    /// Remove a worktree, forcibly discarding any uncommitted changes in it.
    pub fn worktree_remove(&self, path: &Path) -> Result<(), GitError> {
        let path_str = path.to_string_lossy().into_owned();
        self.run_here(&["worktree", "remove", "--force", &path_str])
            .map(drop)
    }

    /// Delete a local branch, forcibly (it may not be fully merged).
    pub fn branch_delete_local(&self, name: &str) -> Result<(), GitError> {
        self.run_here(&["branch", "-D", name]).map(drop)
    }

    /// Delete a remote branch (`git push <remote> --delete <name>`).
    ///
    /// Tolerates the branch already being gone on the remote.
    pub fn branch_delete_remote(&self, remote: &str, name: &str) -> Result<(), GitError> {
        match self.run_here(&["push", remote, "--delete", name]) {
            Ok(_) => Ok(()),
            Err(GitError::Command { stderr, .. })
                if stderr.contains("remote ref does not exist") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Stage exactly `paths` (relative to `dir`) and commit with `message`,
    /// inside the worktree at `dir`.
    pub fn commit_paths(
        &self,
        dir: &Path,
        paths: &[PathBuf],
        message: &str,
    ) -> Result<(), GitError> {
        let mut add_args = vec!["add", "--"];
        let path_strs: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        add_args.extend(path_strs.iter().map(String::as_str));
        self.run(dir, &add_args)?;
        self.run(dir, &["commit", "-m", message]).map(drop)
    }

    /// Reset `dir`'s branch hard to `rev`, discarding the commits between
    /// them. Used to undo a local commit that failed to push, so a retry
    /// starts from the same base rather than piling up abandoned commits.
    pub fn reset_hard(&self, dir: &Path, rev: &str) -> Result<(), GitError> {
        self.run(dir, &["reset", "--hard", rev]).map(drop)
    }

    /// Push `branch` to `remote`.
    pub fn push(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        self.run(dir, &["push", remote, branch]).map(drop)
    }

    /// Push `local_ref` to `remote_ref` on `remote` (`git push <remote>
    /// <local_ref>:<remote_ref>`). Used to fast-forward a shared branch
    /// like `main` directly from a throwaway local branch, without ever
    /// checking `main` out — git rejects the push as non-fast-forward if
    /// `remote_ref` has moved since `local_ref` was created, giving the
    /// same compare-and-swap semantics a checked-out merge would need a
    /// lock for.
    pub fn push_ref(&self, dir: &Path, remote: &str, local_ref: &str, remote_ref: &str) -> Result<(), GitError> {
        self.run(dir, &["push", remote, &format!("{local_ref}:{remote_ref}")]).map(drop)
    }

    /// Fast-forward `local_branch` in the caller's checkout (`dir`) to
    /// `remote_ref`. Never merges divergent history — fails closed.
    pub fn fast_forward(
        &self,
        dir: &Path,
        local_branch: &str,
        remote_ref: &str,
    ) -> Result<(), GitError> {
        self.run(dir, &["merge", "--ff-only", remote_ref])
            .map(drop)
            .map_err(|e| match e {
                GitError::Command { stderr, exit_code, .. } => GitError::Command {
                    command: format!("git merge --ff-only {remote_ref} (updating {local_branch})"),
                    stderr,
                    exit_code,
                },
                other => other,
            })
    }

    /// `git diff --name-status <base>..<head>`, without rename detection
    /// unless `detect_renames` is set (spec.md Open Question: off by
    /// default).
    pub fn diff_name_status(
        &self,
        base: &str,
        head: &str,
        detect_renames: bool,
    ) -> Result<Vec<DiffEntry>, GitError> {
        let range = format!("{base}..{head}");
        let mut args = vec!["diff", "--name-status"];
        if !detect_renames {
            args.push("--no-renames");
        }
        args.push(&range);
        let out = self.run_here(&args)?;
        Ok(out
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| {
                let mut parts = line.splitn(2, '\t');
                let status = parts.next()?;
                let path = parts.next()?;
                let kind = status.chars().next()?.into();
                // Rename lines are "R100\told\tnew"; keep the new path.
                let path = path.rsplit('\t').next().unwrap_or(path);
                Some(DiffEntry {
                    kind,
                    path: path.to_owned(),
                })
            })
            .collect())
    }

    /// `true` if the worktree at `dir` has no uncommitted changes.
    pub fn is_clean(&self, dir: &Path) -> Result<bool, GitError> {
        let out = self.run(dir, &["status", "--porcelain"])?;
        Ok(out.trim().is_empty())
    }

    /// The current branch name checked out at `dir`.
    pub fn current_branch(&self, dir: &Path) -> Result<String, GitError> {
        Ok(self.run(dir, &["rev-parse", "--abbrev-ref", "HEAD"])?.trim().to_owned())
    }

    /// `true` if `name` resolves to a ref (local branch exists).
    pub fn branch_exists(&self, name: &str) -> bool {
        self.run_here(&["rev-parse", "--verify", "--quiet", name]).is_ok()
    }
}
