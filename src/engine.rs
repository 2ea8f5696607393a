//! WU lifecycle engine (spec.md §4.8): orchestrates `claim`/`done`/
//! `block`/`unblock` on top of the validator, state store, lane lock,
//! overlap detector, and micro-worktree transactor.
//!
//! [`Engine`] is the single value spec.md §9's "Singletons and global
//! state" design note asks for: config, path resolver, clock, and git
//! handle travel together through every call rather than being read from
//! ambient globals.

use std::fs;
use std::path::{Path, PathBuf};

use lumenflow_git::{retry_git, BackoffPolicy, GitError, GitRepo};

use crate::clock::{parse_rfc3339_secs, Clock};
use crate::codec::{read_wu, read_wu_any, write_wu};
use crate::config::LumenConfig;
use crate::docs::{render_backlog_doc, render_status_doc, WuSummary};
use crate::error::{LaneHolder, LumenError, OverlapConflict};
use crate::event_log::EventLog;
use crate::lane_lock::LaneLock;
use crate::memory::{CheckpointOptions, ContextOptions, ContextOutput, MemoryNode, MemoryStore};
use crate::micro_worktree::{self, MicroWorktreeRequest, WriteOutcome};
use crate::model::event::Event;
use crate::model::types::{ClaimMode, Lane, WuId, WuStatus};
use crate::model::wu::{ClaimMetadata, CompletionMetadata, Wu};
use crate::overlap::overlapping_paths;
use crate::paths::Paths;
use crate::recovery::{self, Anomalies, RecoverOptions, RecoveryAction};
use crate::state_store::{CheckpointInfo, StateStore};
use crate::validator::{self, Transition};

fn git_err(step: &'static str) -> impl Fn(GitError) -> LumenError {
    move |source| LumenError::Git {
        step: step.to_owned(),
        source,
    }
}

/// External gates (lints, tests, builds) the coordinator merely invokes
/// (spec.md §1 "Out of scope"). Injected rather than hardcoded so `done`
/// doesn't need to know what a gate is.
pub trait GateRunner {
    /// Run gates against `path` (the claimed worktree, or the caller's
    /// checkout in branch-only/branch-pr mode).
    ///
    /// # Errors
    /// Any [`LumenError`] the gate wants surfaced.
    fn run(&self, path: &Path) -> Result<(), LumenError>;
}

/// A [`GateRunner`] that always succeeds — `--skip-gates`, doc/process
/// WUs, and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoGates;

impl GateRunner for NoGates {
    fn run(&self, _path: &Path) -> Result<(), LumenError> {
        Ok(())
    }
}

/// Options for [`Engine::claim`].
#[derive(Clone, Debug)]
pub struct ClaimOptions {
    /// Bypass a lane-busy refusal (emits a forced-claim audit event).
    pub force: bool,
    /// Bypass a code-path overlap refusal. Requires `reason`.
    pub force_overlap: bool,
    /// Human-readable justification for `force`/`force_overlap`.
    pub reason: Option<String>,
    /// Apply fixable schema issues instead of failing on them.
    pub fix: bool,
    /// Bypass the spec-completeness check.
    pub allow_incomplete: bool,
    /// How the claim is materialized on disk.
    pub mode: ClaimMode,
    /// The claiming agent session.
    pub session_id: String,
    /// Justification note, expected (not required) when the lane's WIP
    /// limit is greater than 1.
    pub wip_justification: Option<String>,
}

impl Default for ClaimOptions {
    fn default() -> Self {
        Self {
            force: false,
            force_overlap: false,
            reason: None,
            fix: false,
            allow_incomplete: false,
            mode: ClaimMode::Worktree,
            session_id: "unknown".to_owned(),
            wip_justification: None,
        }
    }
}

/// Options for [`Engine::done`].
#[derive(Clone, Debug, Default)]
pub struct DoneOptions {
    /// Skip gate execution. Requires `reason`.
    pub skip_gates: bool,
    /// Justification for `skip_gates`.
    pub reason: Option<String>,
}

/// A point-in-time view of a WU, for the `status` operation (spec.md §6).
#[derive(Clone, Debug)]
pub struct StatusProjection {
    /// The WU spec as currently on disk.
    pub wu: Wu,
    /// The event log's derived status (`None` if the log has never
    /// mentioned this id).
    pub effective_status: Option<WuStatus>,
    /// The most recent checkpoint, if any and not expired.
    pub last_checkpoint: Option<CheckpointInfo>,
}

/// The WU lifecycle engine: the one value that carries config, paths,
/// clock, and git handle through every operation (spec.md §9).
pub struct Engine<'a> {
    /// Repo-rooted path resolver.
    pub paths: &'a Paths,
    /// Repository configuration.
    pub config: &'a LumenConfig,
    /// Time source.
    pub clock: &'a dyn Clock,
    /// Git handle, rooted at the caller's main checkout.
    pub repo: &'a GitRepo,
}

impl<'a> Engine<'a> {
    /// Build an engine over `paths`/`config`/`clock`/`repo`.
    #[must_use]
    pub const fn new(paths: &'a Paths, config: &'a LumenConfig, clock: &'a dyn Clock, repo: &'a GitRepo) -> Self {
        Self { paths, config, clock, repo }
    }

    /// The git remote name (spec.md §4.1 config).
    #[must_use]
    pub fn remote(&self) -> &str {
        &self.config.repo.remote
    }

    /// The main branch name.
    #[must_use]
    pub fn main_branch(&self) -> &str {
        &self.config.repo.branch
    }

    /// The caller's main checkout — always `self.repo`'s root.
    #[must_use]
    pub fn main_checkout(&self) -> &Path {
        self.repo.root()
    }

    /// Scratch directory micro-worktrees are created under.
    #[must_use]
    pub fn scratch_root(&self) -> PathBuf {
        self.paths.worktrees_dir().join(".micro")
    }

    /// Open (without reading) the event log.
    #[must_use]
    pub fn event_log(&self) -> EventLog {
        EventLog::new(self.paths.events_path())
    }

    /// Project the current state store from the full event log.
    ///
    /// # Errors
    /// Propagates [`LumenError`] from reading/parsing the log.
    pub fn state_store(&self) -> Result<StateStore, LumenError> {
        let events = self.event_log().load()?;
        Ok(StateStore::from_events(&events))
    }

    /// The lane lock resolver, using the configured stale threshold.
    #[must_use]
    pub fn lane_lock(&self) -> LaneLock<'a> {
        LaneLock::new(self.paths, self.config.recovery.stale_lock_hours)
    }

    pub(crate) fn now_secs(&self) -> u64 {
        parse_rfc3339_secs(&self.clock.now_rfc3339()).unwrap_or(0)
    }

    pub(crate) fn to_repo_relative(&self, abs: &Path) -> PathBuf {
        abs.strip_prefix(self.paths.root()).map(Path::to_path_buf).unwrap_or_else(|_| abs.to_path_buf())
    }

    /// Every WU id + path currently declared under `<wu_dir>`.
    ///
    /// # Errors
    /// Propagates [`LumenError::Io`]/[`LumenError::Parse`].
    pub fn list_wu_entries(&self) -> Result<Vec<(WuId, PathBuf)>, LumenError> {
        let dir = self.paths.wu_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(LumenError::Io {
                    path: Some(dir),
                    source: e,
                })
            }
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LumenError::Io {
                path: Some(dir.clone()),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let wu = read_wu_any(&path)?;
            out.push((wu.id.clone(), path));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    /// Every WU currently on disk, for doc regeneration.
    pub(crate) fn all_wus(&self) -> Result<Vec<Wu>, LumenError> {
        let mut out = Vec::new();
        for (id, path) in self.list_wu_entries()? {
            out.push(read_wu(&path, &id)?);
        }
        Ok(out)
    }

    pub(crate) fn summaries(wus: &[Wu]) -> Vec<WuSummary> {
        wus.iter()
            .map(|w| WuSummary {
                id: w.id.clone(),
                title: w.title.clone(),
                lane: w.lane.clone(),
                status: w.status,
            })
            .collect()
    }

    /// Every in-progress WU other than `exclude`, per the state store
    /// (spec.md §4.5: "the set of currently in-progress WUs").
    fn in_progress_wus(&self, store: &StateStore, exclude: &WuId) -> Result<Vec<Wu>, LumenError> {
        let mut out = Vec::new();
        for (id, path) in self.list_wu_entries()? {
            if &id == exclude {
                continue;
            }
            if store.status_of(&id) == Some(WuStatus::InProgress) {
                out.push(read_wu(&path, &id)?);
            }
        }
        Ok(out)
    }

    /// `claim(id, lane, opts)` — spec.md §4.8.
    ///
    /// # Errors
    /// `VALIDATION`/`TRANSITION` from the validator passes, `LANE_BUSY`
    /// on lane contention, `OVERLAP` on a code-path conflict, `GIT`/`IO`
    /// from the underlying transaction. A failed claim leaves no lane
    /// lock held, no new branches, and no spec/event mutation (spec.md §8
    /// property 5).
    pub fn claim(&self, id: &WuId, lane: &Lane, opts: &ClaimOptions) -> Result<(), LumenError> {
        let policy = BackoffPolicy::default();
        retry_git(policy, || self.repo.fetch(self.remote(), self.main_branch())).map_err(git_err("fetch origin/main"))?;

        let wu_path = self.paths.wu_path(id);
        let mut wu = read_wu(&wu_path, id)?;

        validator::check_schema(&wu, self.config)?;
        let fixable = validator::fixable_schema_issues(&wu);
        if !fixable.is_empty() {
            if opts.fix {
                validator::apply_schema_fixes(&mut wu);
            } else {
                return Err(LumenError::SchemaViolation {
                    wu_id: id.clone(),
                    issues: fixable,
                });
            }
        }
        validator::check_manual_tests_at_claim(&wu)?;
        validator::check_spec_completeness(&wu, opts.allow_incomplete)?;
        validator::check_transition(&wu, Transition::Claim)?;
        validator::check_lane_format(lane.as_str())?;

        let mut store = self.state_store()?;
        if validator::is_orphan(&wu, &store) {
            recovery::auto_repair_orphan(self, id, &wu)?;
            store = self.state_store()?;
        }

        let lock = self.lane_lock();
        let now_secs = self.now_secs();
        let check = lock.check(lane, now_secs)?;
        let active_count = store.active_in_lane(lane).len();
        let occupied = check.holders.len().max(active_count);
        let limit = self.config.lanes.wip_limit(lane.as_str()) as usize;
        if occupied >= limit && !opts.force {
            return Err(LumenError::LaneBusy {
                lane: lane.clone(),
                holders: check
                    .holders
                    .iter()
                    .map(|h| LaneHolder {
                        wu_id: h.wu_id.clone(),
                        acquired_at: h.acquired_at.clone(),
                    })
                    .collect(),
            });
        }
        if limit > 1 && opts.wip_justification.is_none() {
            tracing::warn!(lane = %lane.as_str(), "claiming into a WIP>1 lane with no justification note");
        }
        lock.acquire(lane, id, self.clock, opts.wip_justification.clone())?;

        let audit_reason = if opts.force || opts.force_overlap { opts.reason.clone() } else { None };

        let result = self.claim_after_lock(id, lane, &wu, opts, &store, audit_reason);
        if let Err(e) = result {
            let _ = lock.release(lane, id);
            return Err(e);
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn claim_after_lock(
        &self,
        id: &WuId,
        lane: &Lane,
        wu: &Wu,
        opts: &ClaimOptions,
        store: &StateStore,
        audit_reason: Option<String>,
    ) -> Result<(), LumenError> {
        if !(opts.force_overlap && opts.reason.is_some()) {
            let mut conflicts = Vec::new();
            for other in self.in_progress_wus(store, id)? {
                let overlap = overlapping_paths(self.paths.root(), &wu.code_paths, &other.code_paths);
                if !overlap.is_empty() {
                    conflicts.push(OverlapConflict {
                        wu_id: other.id.clone(),
                        overlapping_paths: overlap,
                    });
                }
            }
            if !conflicts.is_empty() {
                return Err(LumenError::Overlap {
                    wu_id: id.clone(),
                    conflicts,
                });
            }
        }

        if matches!(opts.mode, ClaimMode::BranchOnly | ClaimMode::BranchPr) {
            let exclusive_holders: Vec<WuId> = self
                .list_wu_entries()?
                .into_iter()
                .filter(|(other_id, _)| other_id != id)
                .filter_map(|(other_id, path)| read_wu(&path, &other_id).ok())
                .filter(|other| {
                    other.lane == *lane
                        && other
                            .claim
                            .as_ref()
                            .is_some_and(|c| matches!(c.claimed_mode, ClaimMode::BranchOnly | ClaimMode::BranchPr))
                })
                .map(|w| w.id)
                .collect();
            if !exclusive_holders.is_empty() && !opts.force {
                return Err(LumenError::LaneBusy {
                    lane: lane.clone(),
                    holders: exclusive_holders
                        .into_iter()
                        .map(|wu_id| LaneHolder {
                            wu_id,
                            acquired_at: "unknown".to_owned(),
                        })
                        .collect(),
                });
            }
            if !self.repo.is_clean(self.main_checkout()).unwrap_or(false) {
                return Err(LumenError::Preflight {
                    wu_id: id.clone(),
                    detail: "branch-only/branch-pr claim requires a clean working tree".to_owned(),
                });
            }
        }

        let branch = self.paths.lane_branch(lane, id);
        let policy = BackoffPolicy::default();
        let remote_main = format!("{}/{}", self.remote(), self.main_branch());
        let baseline_main_sha = retry_git(policy, || self.repo.rev_parse(&remote_main)).map_err(git_err("resolve baseline sha"))?;

        let worktree_path = self.paths.worktree_path(lane, id);
        let mut created_worktree = false;
        let claim_result = (|| -> Result<(), LumenError> {
            match opts.mode {
                ClaimMode::Worktree => {
                    self.repo
                        .worktree_add_new_branch(&worktree_path, &branch, &remote_main)
                        .map_err(git_err("create claim worktree"))?;
                    created_worktree = true;
                }
                ClaimMode::BranchOnly | ClaimMode::BranchPr => {
                    self.repo
                        .checkout_new_branch(self.main_checkout(), &branch, &remote_main)
                        .map_err(git_err("checkout claim branch"))?;
                }
            }

            let mut claimed = wu.clone();
            claimed.status = WuStatus::InProgress;
            claimed.claim = Some(ClaimMetadata {
                claimed_at: self.clock.now_rfc3339(),
                session_id: opts.session_id.clone(),
                claimed_mode: opts.mode,
                worktree_path: matches!(opts.mode, ClaimMode::Worktree)
                    .then(|| self.to_repo_relative(&worktree_path).to_string_lossy().into_owned()),
                claimed_branch: branch.clone(),
                baseline_main_sha: baseline_main_sha.clone(),
            });

            let wu_rel = self.to_repo_relative(&self.paths.wu_path(id));
            let events_rel = self.to_repo_relative(&self.paths.events_path());
            let ts = self.clock.now_rfc3339();
            let title = claimed.title.clone();
            let push_only = !matches!(opts.mode, ClaimMode::Worktree);

            micro_worktree::run(
                self.repo,
                self.remote(),
                self.main_branch(),
                &self.scratch_root(),
                self.main_checkout(),
                MicroWorktreeRequest {
                    operation: "claim",
                    wu_id: id,
                    push_only,
                },
                |wt_path| {
                    write_wu(&wt_path.join(&wu_rel), &claimed)?;
                    let log = EventLog::new(wt_path.join(&events_rel));
                    log.append(&Event::Claim {
                        wu_id: id.clone(),
                        lane: lane.clone(),
                        title: Some(title.clone()),
                        session_id: Some(opts.session_id.clone()),
                        reason: audit_reason.clone(),
                        ts: ts.clone(),
                    })?;
                    Ok(Some(WriteOutcome {
                        commit_message: format!("claim({id}): {lane}"),
                        files: vec![wu_rel.clone(), events_rel.clone()],
                    }))
                },
            )?;

            if matches!(opts.mode, ClaimMode::Worktree) {
                self.seed_build_artifacts(id, &worktree_path);
            }
            Ok(())
        })();

        if claim_result.is_err() && created_worktree {
            if let Err(e) = self.repo.worktree_remove(&worktree_path) {
                tracing::warn!(%branch, error = %e, "claim rollback: worktree remove failed");
            }
            if let Err(e) = self.repo.branch_delete_local(&branch) {
                tracing::warn!(%branch, error = %e, "claim rollback: local branch delete failed");
            }
        }
        claim_result
    }

    /// Best-effort: symlink the main checkout's `target/` build artifacts
    /// into the new worktree for a faster first build (spec.md §4.8 step
    /// 10, generalized from the source tool's `node_modules` seeding to
    /// this ecosystem's build cache). Refuses silently (logs and skips)
    /// rather than clobbering anything already at the destination.
    fn seed_build_artifacts(&self, id: &WuId, worktree_path: &Path) {
        let src = self.main_checkout().join("target");
        if !src.exists() {
            return;
        }
        let dst = worktree_path.join("target");
        if dst.symlink_metadata().is_ok() {
            tracing::warn!(wu_id = %id, path = %dst.display(), "refusing to seed build artifacts: destination already exists");
            return;
        }
        #[cfg(unix)]
        if let Err(e) = std::os::unix::fs::symlink(&src, &dst) {
            tracing::warn!(wu_id = %id, error = %e, "failed to seed build artifact symlink");
        }
    }

    /// `done(id, opts)` — spec.md §4.8.
    ///
    /// Idempotent: a WU already `done` with consistent artifacts returns
    /// `Ok(())` with no new writes (spec.md §8 property 4). A WU already
    /// `done` but with stale artifacts (a zombie, spec.md S4) is
    /// reconciled rather than re-run from scratch.
    ///
    /// # Errors
    /// `VALIDATION`/`COVERAGE`/`GIT`/`IO` as spec.md §6 describes. Any
    /// failure in the write sequence restores every touched file to its
    /// pre-operation contents (spec.md §8 property 6).
    pub fn done(&self, id: &WuId, opts: &DoneOptions, gates: &dyn GateRunner) -> Result<(), LumenError> {
        let wu_path = self.paths.wu_path(id);
        let wu = read_wu(&wu_path, id)?;

        if wu.status == WuStatus::Done {
            return recovery::reconcile_done_zombie(self, id, &wu);
        }
        validator::check_transition(&wu, Transition::Done)?;
        let claim = wu.claim.clone().ok_or_else(|| LumenError::Invariant {
            detail: format!("{id}: in_progress without claim metadata"),
        })?;

        if opts.skip_gates {
            if opts.reason.is_none() {
                return Err(LumenError::SpecIncomplete {
                    wu_id: id.clone(),
                    reason: "--skip-gates requires a reason".to_owned(),
                });
            }
        } else {
            let gate_path = match claim.claimed_mode {
                ClaimMode::Worktree => self.paths.worktree_path(&wu.lane, id),
                ClaimMode::BranchOnly | ClaimMode::BranchPr => self.main_checkout().to_path_buf(),
            };
            gates.run(&gate_path)?;
        }

        let head_ref = &claim.claimed_branch;
        let changed = self
            .repo
            .diff_name_status(&claim.baseline_main_sha, head_ref, self.config.merge.detect_renames)
            .map_err(git_err("diff against baseline"))?;
        let changed_paths: Vec<String> = changed.into_iter().map(|e| e.path).collect();
        validator::check_code_path_coverage(&wu, &changed_paths)?;

        let stamp_path = self.paths.stamp_path(id);
        let status_path = self.paths.status_path();
        let backlog_path = self.paths.backlog_path();
        let snapshot = Snapshot::capture(&[wu_path.clone(), status_path.clone(), backlog_path.clone(), stamp_path.clone()]);
        let stamp_existed_before = stamp_path.exists();

        let result = self.done_write(id, &wu, &claim);
        if let Err(e) = result {
            snapshot.restore();
            if !stamp_existed_before && stamp_path.exists() {
                let _ = fs::remove_file(&stamp_path);
            }
            return Err(e);
        }

        let lock = self.lane_lock();
        if let Err(e) = lock.release(&wu.lane, id) {
            tracing::warn!(%id, error = %e, "done: lane lock release failed");
        }
        if matches!(claim.claimed_mode, ClaimMode::Worktree) {
            let wt = self.main_checkout().join(claim.worktree_path.as_deref().unwrap_or(""));
            if wt.exists() {
                if let Err(e) = self.repo.worktree_remove(&wt) {
                    tracing::warn!(%id, error = %e, "done: worktree remove failed");
                }
            }
        }
        if let Err(e) = self.repo.branch_delete_local(&claim.claimed_branch) {
            tracing::warn!(%id, error = %e, "done: local branch delete failed");
        }
        if let Err(e) = self.repo.branch_delete_remote(self.remote(), &claim.claimed_branch) {
            tracing::warn!(%id, error = %e, "done: remote branch delete failed");
        }
        Ok(())
    }

    fn done_write(&self, id: &WuId, wu: &Wu, claim: &ClaimMetadata) -> Result<(), LumenError> {
        let mut completed = wu.clone();
        completed.status = WuStatus::Done;
        completed.claim = None;
        completed.completion = Some(CompletionMetadata {
            completed_at: self.clock.now_rfc3339(),
            locked: true,
        });

        let mut all = self.all_wus()?;
        if let Some(existing) = all.iter_mut().find(|w| w.id == *id) {
            *existing = completed.clone();
        } else {
            all.push(completed.clone());
        }
        let summaries = Self::summaries(&all);
        let status_doc = render_status_doc(&summaries);
        let backlog_doc = render_backlog_doc(&summaries);

        let wu_rel = self.to_repo_relative(&self.paths.wu_path(id));
        let status_rel = self.to_repo_relative(&self.paths.status_path());
        let backlog_rel = self.to_repo_relative(&self.paths.backlog_path());
        let stamp_rel = self.to_repo_relative(&self.paths.stamp_path(id));
        let events_rel = self.to_repo_relative(&self.paths.events_path());
        let ts = self.clock.now_rfc3339();
        let push_only = !matches!(claim.claimed_mode, ClaimMode::Worktree);

        micro_worktree::run(
            self.repo,
            self.remote(),
            self.main_branch(),
            &self.scratch_root(),
            self.main_checkout(),
            MicroWorktreeRequest {
                operation: "done",
                wu_id: id,
                push_only,
            },
            |wt_path| {
                write_wu(&wt_path.join(&wu_rel), &completed)?;
                fs::write(wt_path.join(&status_rel), &status_doc).map_err(|e| LumenError::Io {
                    path: Some(wt_path.join(&status_rel)),
                    source: e,
                })?;
                fs::write(wt_path.join(&backlog_rel), &backlog_doc).map_err(|e| LumenError::Io {
                    path: Some(wt_path.join(&backlog_rel)),
                    source: e,
                })?;
                let stamp_dest = wt_path.join(&stamp_rel);
                if let Some(parent) = stamp_dest.parent() {
                    fs::create_dir_all(parent).map_err(|e| LumenError::Io {
                        path: Some(parent.to_owned()),
                        source: e,
                    })?;
                }
                fs::write(&stamp_dest, "").map_err(|e| LumenError::Io {
                    path: Some(stamp_dest.clone()),
                    source: e,
                })?;
                let log = EventLog::new(wt_path.join(&events_rel));
                log.append(&Event::Done { wu_id: id.clone(), ts: ts.clone() })?;
                Ok(Some(WriteOutcome {
                    commit_message: format!("done({id})"),
                    files: vec![wu_rel.clone(), status_rel.clone(), backlog_rel.clone(), stamp_rel.clone(), events_rel.clone()],
                }))
            },
        )
    }

    /// `block(id, reason)` — spec.md §4.8. Releases the lane lock; the
    /// worktree remains.
    ///
    /// # Errors
    /// `VALIDATION` if `id` is not `in_progress`, `GIT`/`IO` from the
    /// underlying transaction.
    pub fn block(&self, id: &WuId, reason: Option<String>) -> Result<(), LumenError> {
        self.transition_status(id, Transition::Block, WuStatus::Blocked, "block", reason)
    }

    /// `unblock(id)`: `blocked -> in_progress`, re-acquiring the lane
    /// lock that `block` released.
    ///
    /// # Errors
    /// `VALIDATION` if `id` is not `blocked`, `CONCURRENCY` if the lane
    /// is at capacity, `GIT`/`IO` from the underlying transaction.
    pub fn unblock(&self, id: &WuId) -> Result<(), LumenError> {
        self.transition_status(id, Transition::Unblock, WuStatus::InProgress, "unblock", None)
    }

    fn transition_status(
        &self,
        id: &WuId,
        transition: Transition,
        new_status: WuStatus,
        operation: &'static str,
        reason: Option<String>,
    ) -> Result<(), LumenError> {
        let wu_path = self.paths.wu_path(id);
        let wu = read_wu(&wu_path, id)?;
        validator::check_transition(&wu, transition)?;

        let lock = self.lane_lock();
        if matches!(transition, Transition::Unblock) {
            let now_secs = self.now_secs();
            let check = lock.check(&wu.lane, now_secs)?;
            let limit = self.config.lanes.wip_limit(wu.lane.as_str()) as usize;
            if check.holders.len() >= limit {
                return Err(LumenError::LaneBusy {
                    lane: wu.lane.clone(),
                    holders: check
                        .holders
                        .into_iter()
                        .map(|h| LaneHolder {
                            wu_id: h.wu_id,
                            acquired_at: h.acquired_at,
                        })
                        .collect(),
                });
            }
            lock.acquire(&wu.lane, id, self.clock, None)?;
        }

        let mut updated = wu.clone();
        updated.status = new_status;

        let wu_rel = self.to_repo_relative(&wu_path);
        let events_rel = self.to_repo_relative(&self.paths.events_path());
        let ts = self.clock.now_rfc3339();
        let lane = wu.lane.clone();
        let push_only = wu
            .claim
            .as_ref()
            .is_some_and(|c| !matches!(c.claimed_mode, ClaimMode::Worktree));

        let result = micro_worktree::run(
            self.repo,
            self.remote(),
            self.main_branch(),
            &self.scratch_root(),
            self.main_checkout(),
            MicroWorktreeRequest {
                operation,
                wu_id: id,
                push_only,
            },
            |wt_path| {
                write_wu(&wt_path.join(&wu_rel), &updated)?;
                let log = EventLog::new(wt_path.join(&events_rel));
                let event = match transition {
                    Transition::Block => Event::Block {
                        wu_id: id.clone(),
                        reason: reason.clone(),
                        ts: ts.clone(),
                    },
                    _ => Event::Claim {
                        wu_id: id.clone(),
                        lane: lane.clone(),
                        title: Some(updated.title.clone()),
                        session_id: None,
                        reason: None,
                        ts: ts.clone(),
                    },
                };
                log.append(&event)?;
                Ok(Some(WriteOutcome {
                    commit_message: format!("{operation}({id})"),
                    files: vec![wu_rel.clone(), events_rel.clone()],
                }))
            },
        );

        if result.is_err() && matches!(transition, Transition::Unblock) {
            let _ = lock.release(&wu.lane, id);
        }
        if result.is_ok() && matches!(transition, Transition::Block) {
            if let Err(e) = lock.release(&wu.lane, id) {
                tracing::warn!(%id, error = %e, "block: lane lock release failed");
            }
        }
        result
    }

    /// `status(id)` — spec.md §6.
    ///
    /// # Errors
    /// Propagates [`LumenError`] from reading the spec or event log.
    pub fn status(&self, id: &WuId) -> Result<StatusProjection, LumenError> {
        let wu = read_wu(&self.paths.wu_path(id), id)?;
        let store = self.state_store()?;
        Ok(StatusProjection {
            effective_status: store.status_of(id),
            last_checkpoint: store.last_checkpoint(id),
            wu,
        })
    }

    /// Open (without reading) the memory node/relationship store.
    #[must_use]
    pub fn memory_store(&self) -> MemoryStore {
        MemoryStore::new(self.paths.memory_log_path(), self.paths.memory_relationships_path())
    }

    /// `checkpoint(note, opts)` — spec.md §4.9. When `opts.wu_id` is set,
    /// also appends a `checkpoint` event to the WU event log.
    ///
    /// # Errors
    /// Propagates [`LumenError`] from the underlying memory/event log
    /// writes.
    pub fn checkpoint(&self, note: &str, opts: &CheckpointOptions) -> Result<MemoryNode, LumenError> {
        let log = self.event_log();
        self.memory_store().checkpoint(note, opts, Some(&log), self.clock)
    }

    /// `context(id, opts)` — spec.md §4.9 size-bounded recall block.
    ///
    /// # Errors
    /// `VALIDATION` if `id` names no WU spec; propagates [`LumenError`]
    /// from the underlying memory load.
    pub fn context(&self, id: &WuId, opts: &ContextOptions) -> Result<ContextOutput, LumenError> {
        let wu = read_wu(&self.paths.wu_path(id), id)?;
        self.memory_store().context(&wu, opts)
    }

    /// `recover_context(id, max_size)` — spec.md §4.9/§8 S6 compact
    /// post-compaction recovery block.
    ///
    /// # Errors
    /// `VALIDATION` if `id` names no WU spec; propagates [`LumenError`]
    /// from the underlying event/memory log reads.
    pub fn recover_context(&self, id: &WuId, max_size: usize) -> Result<ContextOutput, LumenError> {
        let wu = read_wu(&self.paths.wu_path(id), id)?;
        let store = self.state_store()?;
        let checkpoint = store.last_checkpoint(id);
        self.memory_store().recover(&wu, checkpoint.as_ref(), max_size)
    }

    /// `scan()` — spec.md §4.10: detect zombie WUs and duplicate ids
    /// without mutating anything.
    ///
    /// # Errors
    /// Propagates [`LumenError`] from reading WU specs or the event log.
    pub fn scan(&self) -> Result<Anomalies, LumenError> {
        recovery::scan(self)
    }

    /// `recover(id, action, opts)` — spec.md §4.10 manual recovery:
    /// `resume`/`reset`/`nuke`/`cleanup`.
    ///
    /// # Errors
    /// `RECOVERY` if the action isn't applicable or attempts are
    /// exhausted; `GIT`/`IO` from the underlying transaction.
    pub fn recover(&self, id: &WuId, action: RecoveryAction, opts: &RecoverOptions) -> Result<(), LumenError> {
        recovery::recover(self, id, action, opts)
    }

    /// `repair_duplicate_ids()` — spec.md §4.10: reassign every
    /// non-canonical copy of a duplicated id to a fresh one.
    ///
    /// # Errors
    /// Propagates [`LumenError`] from the underlying transaction.
    pub fn repair_duplicate_ids(&self) -> Result<Vec<WuId>, LumenError> {
        recovery::repair_duplicate_ids(self)
    }
}

/// Snapshot of a set of files' prior contents (or nonexistence), for the
/// atomic rollback primitive (spec.md §4.10, §7 "Propagation policy").
struct Snapshot {
    entries: Vec<(PathBuf, Option<Vec<u8>>)>,
}

impl Snapshot {
    fn capture(paths: &[PathBuf]) -> Self {
        let entries = paths.iter().map(|p| (p.clone(), fs::read(p).ok())).collect();
        Self { entries }
    }

    fn restore(&self) {
        for (path, prior) in &self.entries {
            match prior {
                Some(bytes) => {
                    if let Err(e) = fs::write(path, bytes) {
                        tracing::warn!(path = %path.display(), error = %e, "rollback: failed to restore file");
                    }
                }
                None => {
                    if path.exists() {
                        if let Err(e) = fs::remove_file(path) {
                            tracing::warn!(path = %path.display(), error = %e, "rollback: failed to remove newly created file");
                        }
                    }
                }
            }
        }
    }
}
