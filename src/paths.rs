//! Path & config resolver (spec.md §4.1).
//!
//! The only module that knows the on-disk layout. Every path is
//! repo-root-relative and resolution is pure — no I/O here at all.

use std::path::{Path, PathBuf};

use crate::config::LayoutConfig;
use crate::model::types::{Lane, WuId};

/// Deterministically resolves repo-rooted paths from one [`LayoutConfig`].
#[derive(Clone, Debug)]
pub struct Paths {
    root: PathBuf,
    layout: LayoutConfig,
}

impl Paths {
    /// Build a resolver for the repository rooted at `root`.
    #[must_use]
    pub fn new(root: PathBuf, layout: LayoutConfig) -> Self {
        Self { root, layout }
    }

    /// The repository root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<wu_dir>/<id>.yaml`.
    #[must_use]
    pub fn wu_path(&self, id: &WuId) -> PathBuf {
        self.root.join(&self.layout.wu_dir).join(format!("{id}.yaml"))
    }

    /// The directory holding all WU spec files.
    #[must_use]
    pub fn wu_dir(&self) -> PathBuf {
        self.root.join(&self.layout.wu_dir)
    }

    /// The human-readable status dashboard doc.
    #[must_use]
    pub fn status_path(&self) -> PathBuf {
        self.root.join(&self.layout.status_doc)
    }

    /// The human-readable backlog dashboard doc.
    #[must_use]
    pub fn backlog_path(&self) -> PathBuf {
        self.root.join(&self.layout.backlog_doc)
    }

    /// `<stamps_dir>/<id>.done`.
    #[must_use]
    pub fn stamp_path(&self, id: &WuId) -> PathBuf {
        self.root.join(&self.layout.stamps_dir).join(format!("{id}.done"))
    }

    /// `<state_dir>/wu-events.jsonl`.
    #[must_use]
    pub fn events_path(&self) -> PathBuf {
        self.root.join(&self.layout.state_dir).join("wu-events.jsonl")
    }

    /// `<state_dir>/lane-locks/`.
    #[must_use]
    pub fn lane_locks_dir(&self) -> PathBuf {
        self.root.join(&self.layout.state_dir).join("lane-locks")
    }

    /// `<state_dir>/lane-locks/<lane-kebab>/` — the directory holding one
    /// lock file per current holder. At the default WIP limit of 1 this
    /// holds at most one file; WIP > N holds up to N (spec.md §4.4: "the
    /// lane lock degrades to a counted semaphore", holders still
    /// individually identifiable by filename).
    #[must_use]
    pub fn lane_lock_dir(&self, lane: &Lane) -> PathBuf {
        self.lane_locks_dir().join(lane.kebab())
    }

    /// `<state_dir>/lane-locks/<lane-kebab>/<wu-id>.lock` — one holder's
    /// slot within the lane's lock directory.
    #[must_use]
    pub fn lane_lock_holder_path(&self, lane: &Lane, id: &WuId) -> PathBuf {
        self.lane_lock_dir(lane).join(format!("{}.lock", id.as_str().to_lowercase()))
    }

    /// `<memory_dir>/`.
    #[must_use]
    pub fn memory_dir(&self) -> PathBuf {
        self.root.join(&self.layout.memory_dir)
    }

    /// `<memory_dir>/memory.jsonl`.
    #[must_use]
    pub fn memory_log_path(&self) -> PathBuf {
        self.memory_dir().join("memory.jsonl")
    }

    /// `<memory_dir>/relationships.jsonl`.
    #[must_use]
    pub fn memory_relationships_path(&self) -> PathBuf {
        self.memory_dir().join("relationships.jsonl")
    }

    /// `<worktrees_dir>/`.
    #[must_use]
    pub fn worktrees_dir(&self) -> PathBuf {
        self.root.join(&self.layout.worktrees_dir)
    }

    /// `<worktrees_dir>/<lane-kebab>-<wu-id>/`.
    #[must_use]
    pub fn worktree_path(&self, lane: &Lane, id: &WuId) -> PathBuf {
        self.worktrees_dir().join(format!("{}-{}", lane.kebab(), id.as_str().to_lowercase()))
    }

    /// `<recovery_dir>/<wu-id>.recovery`.
    #[must_use]
    pub fn recovery_marker_path(&self, id: &WuId) -> PathBuf {
        self.root
            .join(&self.layout.recovery_dir)
            .join(format!("{}.recovery", id.as_str().to_lowercase()))
    }

    /// `lane/<lane-kebab>/<wu-id>` — the branch name a claimed WU works on.
    #[must_use]
    pub fn lane_branch(&self, lane: &Lane, id: &WuId) -> String {
        format!("lane/{}/{}", lane.kebab(), id.as_str().to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> Paths {
        Paths::new(PathBuf::from("/repo"), LayoutConfig::default())
    }

    fn wu(n: u64) -> WuId {
        WuId::from_number(n).unwrap()
    }

    #[test]
    fn wu_path_joins_dir_and_filename() {
        assert_eq!(paths().wu_path(&wu(42)), PathBuf::from("/repo/wus/WU-42.yaml"));
    }

    #[test]
    fn stamp_path_uses_stamps_dir() {
        assert_eq!(
            paths().stamp_path(&wu(1)),
            PathBuf::from("/repo/.lumenflow/stamps/WU-1.done")
        );
    }

    #[test]
    fn lane_lock_holder_path_kebabs_parent_subdomain_lane() {
        let lane = Lane::new("Backend: Auth").unwrap();
        assert_eq!(
            paths().lane_lock_holder_path(&lane, &wu(9)),
            PathBuf::from("/repo/.lumenflow/state/lane-locks/backend-auth/wu-9.lock")
        );
    }

    #[test]
    fn worktree_path_combines_lane_and_id() {
        let lane = Lane::new("Core").unwrap();
        assert_eq!(
            paths().worktree_path(&lane, &wu(7)),
            PathBuf::from("/repo/.lumenflow/worktrees/core-wu-7")
        );
    }

    #[test]
    fn lane_branch_is_lowercase_and_slash_joined() {
        let lane = Lane::new("Backend: Auth").unwrap();
        assert_eq!(paths().lane_branch(&lane, &wu(3)), "lane/backend-auth/wu-3");
    }

    #[test]
    fn events_path_is_under_state_dir() {
        assert_eq!(paths().events_path(), PathBuf::from("/repo/.lumenflow/state/wu-events.jsonl"));
    }
}
