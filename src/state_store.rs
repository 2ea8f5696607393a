//! State store: an in-memory projection built by replaying the event log
//! (spec.md §4.3).
//!
//! Readers always reopen and re-project — there is no cache, because the
//! coordinator is invoked as a short-lived CLI process per invocation
//! (spec.md §5: no warm process to amortize a cache across). The
//! projection is a plain, allocation-light left-fold over `&[Event]`.

use std::collections::{HashMap, HashSet};

use crate::model::event::Event;
use crate::model::types::{Lane, WuId, WuStatus};

/// The last checkpoint recorded for a WU, per spec.md §4.3
/// `last_checkpoint(id) → {content, next_steps, progress, ts}?`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// The checkpoint's free-text note.
    pub content: Option<String>,
    /// What's been done so far.
    pub progress: Option<String>,
    /// What to do next.
    pub next_steps: Option<String>,
    /// A `git diff --stat`-style summary recorded at checkpoint time.
    pub git_diff_stat: Option<String>,
    /// RFC 3339 timestamp.
    pub ts: String,
}

#[derive(Clone, Debug, Default)]
struct WuProjection {
    status: Option<WuStatus>,
    lane: Option<Lane>,
    checkpoint: Option<CheckpointInfo>,
}

/// An in-memory projection of the event log (spec.md §4.3).
#[derive(Clone, Debug, Default)]
pub struct StateStore {
    by_wu: HashMap<WuId, WuProjection>,
}

impl StateStore {
    /// Build a projection from events in file order.
    ///
    /// Per-WU: the most recent non-checkpoint event sets `status`
    /// (`claim` → `in_progress`, `release` → `ready`, `block` →
    /// `blocked`, `done` → `done`). Checkpoints never change status; they
    /// update the WU's current checkpoint and expire (are cleared) the
    /// next time a `claim`/`release`/`done`/`block` event is seen, since
    /// each of those starts or ends a distinct in_progress episode.
    #[must_use]
    pub fn from_events(events: &[Event]) -> Self {
        let mut by_wu: HashMap<WuId, WuProjection> = HashMap::new();
        for event in events {
            let entry = by_wu.entry(event.wu_id().clone()).or_default();
            match event {
                Event::Claim { lane, .. } => {
                    entry.status = Some(WuStatus::InProgress);
                    entry.lane = Some(lane.clone());
                    entry.checkpoint = None;
                }
                Event::Release { .. } => {
                    entry.status = Some(WuStatus::Ready);
                    entry.checkpoint = None;
                }
                Event::Block { .. } => {
                    entry.status = Some(WuStatus::Blocked);
                    entry.checkpoint = None;
                }
                Event::Done { .. } => {
                    entry.status = Some(WuStatus::Done);
                    entry.checkpoint = None;
                }
                Event::Checkpoint {
                    note,
                    progress,
                    next_steps,
                    git_diff_stat,
                    ts,
                    ..
                } => {
                    entry.checkpoint = Some(CheckpointInfo {
                        content: note.clone(),
                        progress: progress.clone(),
                        next_steps: next_steps.clone(),
                        git_diff_stat: git_diff_stat.clone(),
                        ts: ts.clone(),
                    });
                }
            }
        }
        Self { by_wu }
    }

    /// The effective status of `id`: `unknown` if the event log has never
    /// mentioned it.
    #[must_use]
    pub fn status_of(&self, id: &WuId) -> Option<WuStatus> {
        self.by_wu.get(id).and_then(|p| p.status)
    }

    /// Every WU whose effective status is `in_progress` and whose most
    /// recent claim named `lane`.
    #[must_use]
    pub fn in_progress_in_lane(&self, lane: &Lane) -> Vec<WuId> {
        let mut ids: Vec<WuId> = self
            .by_wu
            .iter()
            .filter(|(_, p)| p.status == Some(WuStatus::InProgress) && p.lane.as_ref() == Some(lane))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Every WU whose effective status is `in_progress` or `blocked` and
    /// whose most recent claim named `lane` — the set that counts against
    /// the lane's WIP limit (blocked work still holds its slot; spec.md
    /// §4.4 lane lock is released only on `done`/`block`/`reset`/`nuke`,
    /// and `block` itself keeps the WU occupying the lane).
    #[must_use]
    pub fn active_in_lane(&self, lane: &Lane) -> Vec<WuId> {
        let mut ids: Vec<WuId> = self
            .by_wu
            .iter()
            .filter(|(_, p)| {
                matches!(p.status, Some(WuStatus::InProgress) | Some(WuStatus::Blocked))
                    && p.lane.as_ref() == Some(lane)
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// The lane `id`'s most recent claim named, if the event log has ever
    /// recorded a claim for it. Lets callers that only have a `WuId` (e.g.
    /// `done`/`block`) locate the worktree a claim created without the
    /// caller having to pass the lane back in.
    #[must_use]
    pub fn lane_of(&self, id: &WuId) -> Option<Lane> {
        self.by_wu.get(id).and_then(|p| p.lane.clone())
    }

    /// The last checkpoint recorded for `id`, if any and not yet expired.
    #[must_use]
    pub fn last_checkpoint(&self, id: &WuId) -> Option<CheckpointInfo> {
        self.by_wu.get(id).and_then(|p| p.checkpoint.clone())
    }

    /// Every WU id the event log has ever mentioned.
    #[must_use]
    pub fn known_ids(&self) -> HashSet<WuId> {
        self.by_wu.keys().cloned().collect()
    }
}
