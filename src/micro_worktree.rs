//! Micro-worktree transactor (spec.md §4.7).
//!
//! Modeled as a scoped resource (spec.md §9 design note "Scoped resource
//! acquisition"): [`MicroWorktree::begin`] returns a guard whose `Drop`
//! impl always tears down — worktree remove, local branch delete, remote
//! branch delete — on every exit path, including an early return via `?`
//! or a panic unwinding through the caller's closure. Teardown failures
//! are logged, never panic-propagated, and never mask the primary error.

use std::path::{Path, PathBuf};

use lumenflow_git::{retry_git, BackoffPolicy, GitRepo};

use crate::error::LumenError;
use crate::model::types::WuId;

/// What a caller-supplied `execute` closure returns: either a set of
/// files to stage, commit, and push, or `None` for a no-op transaction
/// (nothing to tear down but the scratch worktree itself).
#[derive(Clone, Debug)]
pub struct WriteOutcome {
    /// The commit message for the staged files.
    pub commit_message: String,
    /// Files to stage, resolved relative to the worktree root.
    pub files: Vec<PathBuf>,
}

fn to_git_err(step: &str) -> impl Fn(lumenflow_git::GitError) -> LumenError + '_ {
    move |source| LumenError::Git {
        step: step.to_owned(),
        source,
    }
}

/// A live micro-worktree: a throwaway branch plus a scratch worktree
/// checked out on it, always torn down on drop.
pub struct MicroWorktree<'a> {
    repo: &'a GitRepo,
    remote: String,
    main_branch: String,
    branch: String,
    path: PathBuf,
    torn_down: bool,
}

impl<'a> MicroWorktree<'a> {
    /// Step 1-2: fetch `<remote>/<main_branch>`, create `branch` at that
    /// ref, and check out a worktree for it at `path`.
    ///
    /// # Errors
    /// Returns [`LumenError::Git`] naming the failing step.
    pub fn begin(
        repo: &'a GitRepo,
        remote: &str,
        main_branch: &str,
        branch: String,
        path: PathBuf,
    ) -> Result<Self, LumenError> {
        let policy = BackoffPolicy::default();
        retry_git(policy, || repo.fetch(remote, main_branch)).map_err(to_git_err("fetch origin/main"))?;
        let start_point = format!("{remote}/{main_branch}");
        repo.worktree_add_new_branch(&path, &branch, &start_point)
            .map_err(to_git_err("create micro-worktree"))?;
        Ok(Self {
            repo,
            remote: remote.to_owned(),
            main_branch: main_branch.to_owned(),
            branch,
            path,
            torn_down: false,
        })
    }

    /// The scratch worktree's path, passed to the caller's `execute`.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Step 4: stage exactly `outcome.files`, commit, and push the
    /// commit directly onto `<remote>/<main_branch>` (`branch:main_branch`
    /// refspec) — a compare-and-swap push that fails non-fast-forward if
    /// `main_branch` moved since [`begin`](Self::begin)'s fetch, rather
    /// than pushing the throwaway branch under its own name.
    ///
    /// # Errors
    /// Returns [`LumenError::Git`] naming the failing step.
    pub fn commit_and_push(&self, outcome: &WriteOutcome) -> Result<(), LumenError> {
        let policy = BackoffPolicy::default();
        self.repo
            .commit_paths(&self.path, &outcome.files, &outcome.commit_message)
            .map_err(to_git_err("commit"))?;
        retry_git(policy, || self.repo.push_ref(&self.path, &self.remote, &self.branch, &self.main_branch))
            .map_err(to_git_err("push"))
    }

    /// Step 5: fetch and fast-forward `main_branch` in the caller's
    /// checkout at `main_checkout`, now that [`commit_and_push`](Self::commit_and_push)
    /// has advanced `<remote>/<main_branch>`. Never merges divergent
    /// history — a non-fast-forward state surfaces as a typed error
    /// (spec.md §4.7 step 5: "on divergence, abort with a typed error").
    ///
    /// # Errors
    /// Returns [`LumenError::Git`] naming the failing step.
    pub fn fast_forward_main(&self, main_checkout: &Path, main_branch: &str) -> Result<(), LumenError> {
        let policy = BackoffPolicy::default();
        retry_git(policy, || self.repo.fetch(&self.remote, main_branch))
            .map_err(to_git_err("fetch before fast-forward"))?;
        let remote_ref = format!("{}/{main_branch}", self.remote);
        self.repo
            .fast_forward(main_checkout, main_branch, &remote_ref)
            .map_err(to_git_err("fast-forward main"))
    }

    /// Step 6: tear down explicitly (worktree remove, branch delete
    /// local + remote). Idempotent — safe to call more than once, and
    /// called automatically by `Drop` if not already run.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if let Err(e) = self.repo.worktree_remove(&self.path) {
            tracing::warn!(branch = %self.branch, path = %self.path.display(), error = %e, "micro-worktree teardown: worktree remove failed");
        }
        if let Err(e) = self.repo.branch_delete_local(&self.branch) {
            tracing::warn!(branch = %self.branch, error = %e, "micro-worktree teardown: local branch delete failed");
        }
        if let Err(e) = self.repo.branch_delete_remote(&self.remote, &self.branch) {
            tracing::warn!(branch = %self.branch, error = %e, "micro-worktree teardown: remote branch delete failed");
        }
    }
}

impl Drop for MicroWorktree<'_> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Parameters for [`run`].
pub struct MicroWorktreeRequest<'a> {
    /// A short label identifying the caller's operation (e.g. `"claim"`,
    /// `"done"`), used to derive the throwaway branch name.
    pub operation: &'a str,
    /// The WU this transaction is acting on behalf of.
    pub wu_id: &'a WuId,
    /// When `true`, step 5 (fast-forwarding main) is skipped — the
    /// transaction only pushes the throwaway branch's commit upstream via
    /// its own merge/PR path, e.g. recovery operations (spec.md §5
    /// "push_only=true").
    pub push_only: bool,
}

/// Run the full micro-worktree contract (spec.md §4.7): create a
/// throwaway branch + worktree off `<remote>/<main_branch>`, call
/// `execute` with the worktree path, stage/commit/push anything it
/// returns, optionally fast-forward `main_checkout`, then always tear
/// down.
///
/// # Errors
/// Returns [`LumenError::Git`] naming the failing step. Teardown always
/// runs regardless of where `execute` or a later step fails.
pub fn run<F>(
    repo: &GitRepo,
    remote: &str,
    main_branch: &str,
    scratch_root: &Path,
    main_checkout: &Path,
    request: MicroWorktreeRequest<'_>,
    execute: F,
) -> Result<(), LumenError>
where
    F: FnOnce(&Path) -> Result<Option<WriteOutcome>, LumenError>,
{
    let branch = format!("micro/{}/{}", request.operation, request.wu_id.as_str().to_lowercase());
    let path = scratch_root.join(format!("{}-{}", request.operation, request.wu_id.as_str().to_lowercase()));

    let worktree = MicroWorktree::begin(repo, remote, main_branch, branch, path)?;
    let outcome = execute(worktree.path())?;
    if let Some(outcome) = &outcome {
        worktree.commit_and_push(outcome)?;
    }
    if !request.push_only {
        worktree.fast_forward_main(main_checkout, main_branch)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git").args(args).current_dir(dir).status().unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    fn init_bare_and_clone() -> (TempDir, PathBuf, PathBuf) {
        let root = TempDir::new().unwrap();
        let bare = root.path().join("origin.git");
        std::fs::create_dir_all(&bare).unwrap();
        git(&bare, &["init", "--bare", "-q"]);

        let work = root.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        git(&work, &["init", "-q", "-b", "main"]);
        git(&work, &["config", "user.email", "t@example.com"]);
        git(&work, &["config", "user.name", "t"]);
        std::fs::write(work.join("README.md"), "hello\n").unwrap();
        git(&work, &["add", "."]);
        git(&work, &["commit", "-q", "-m", "init"]);
        git(&work, &["remote", "add", "origin", bare.to_str().unwrap()]);
        git(&work, &["push", "-q", "-u", "origin", "main"]);

        let bare_path = bare;
        let work_path = work;
        (root, bare_path, work_path)
    }

    #[test]
    fn run_stages_commits_and_pushes_then_tears_down() {
        let (root, _bare, work) = init_bare_and_clone();
        let repo = GitRepo::new(work.clone());
        let scratch = root.path().join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();

        let wu_id = WuId::from_number(1).unwrap();
        let request = MicroWorktreeRequest {
            operation: "claim",
            wu_id: &wu_id,
            push_only: true,
        };

        run(&repo, "origin", "main", &scratch, &work, request, |wt_path| {
            std::fs::write(wt_path.join("note.txt"), "hi\n").unwrap();
            Ok(Some(WriteOutcome {
                commit_message: "add note".to_owned(),
                files: vec![PathBuf::from("note.txt")],
            }))
        })
        .unwrap();

        // The branch was pushed then deleted both locally and remotely;
        // the scratch worktree directory should be gone.
        assert!(!scratch.join("claim-wu-1").exists());
        assert!(!repo.branch_exists("micro/claim/wu-1"));
    }

    #[test]
    fn no_op_execute_skips_commit_but_still_tears_down() {
        let (root, _bare, work) = init_bare_and_clone();
        let repo = GitRepo::new(work.clone());
        let scratch = root.path().join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();

        let wu_id = WuId::from_number(2).unwrap();
        let request = MicroWorktreeRequest {
            operation: "checkpoint",
            wu_id: &wu_id,
            push_only: true,
        };

        run(&repo, "origin", "main", &scratch, &work, request, |_wt_path| Ok(None)).unwrap();

        assert!(!repo.branch_exists("micro/checkpoint/wu-2"));
    }
}
