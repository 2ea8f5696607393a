//! Recovery subsystem (spec.md §4.10).
//!
//! Two entry points are reached automatically, inline with the normal
//! lifecycle operations they guard:
//!
//! - [`auto_repair_orphan`] — `claim` calls this when the event log
//!   disagrees with an already-`ready` spec (pass 8, [`crate::validator::is_orphan`]).
//! - [`reconcile_done_zombie`] — `done` calls this instead of re-running
//!   the happy path when the spec already says `done`.
//!
//! Everything else here ([`scan`], [`recover`], [`repair_duplicate_ids`])
//! is reached only through an explicit operator action (`lumen recover`),
//! never from inside `claim`/`done`/`block`/`unblock`.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::codec::{read_wu, read_wu_any, write_wu};
use crate::engine::Engine;
use crate::error::LumenError;
use crate::event_log::EventLog;
use crate::micro_worktree::{self, MicroWorktreeRequest, WriteOutcome};
use crate::model::event::Event;
use crate::model::types::{Lane, WuId, WuStatus};
use crate::model::wu::Wu;
use crate::state_store::StateStore;

fn git_err(step: &'static str) -> impl Fn(lumenflow_git::GitError) -> LumenError {
    move |source| LumenError::Git {
        step: step.to_owned(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Recovery attempt accounting
// ---------------------------------------------------------------------------

/// Attempt count persisted at `paths.recovery_marker_path(id)` (spec.md
/// §4.10 "Recovery attempt accounting"). Local bookkeeping, not a shared
/// doc — written directly, not through the micro-worktree transactor.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
struct AttemptCounter {
    attempts: u32,
}

fn read_attempts(engine: &Engine<'_>, id: &WuId) -> u32 {
    let path = engine.paths.recovery_marker_path(id);
    fs::read_to_string(&path)
        .ok()
        .and_then(|s| serde_json::from_str::<AttemptCounter>(&s).ok())
        .map_or(0, |c| c.attempts)
}

fn bump_attempts(engine: &Engine<'_>, id: &WuId) -> Result<u32, LumenError> {
    let path = engine.paths.recovery_marker_path(id);
    let next = read_attempts(engine, id) + 1;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| LumenError::Io {
            path: Some(parent.to_owned()),
            source: e,
        })?;
    }
    let json = serde_json::to_string(&AttemptCounter { attempts: next }).map_err(|e| LumenError::Parse {
        path: path.clone(),
        line: None,
        detail: e.to_string(),
    })?;
    fs::write(&path, json).map_err(|e| LumenError::Io {
        path: Some(path.clone()),
        source: e,
    })?;
    Ok(next)
}

fn clear_attempts(engine: &Engine<'_>, id: &WuId) {
    let path = engine.paths.recovery_marker_path(id);
    if let Err(e) = fs::remove_file(&path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(%id, error = %e, "recovery: failed to clear attempt counter");
        }
    }
}

// ---------------------------------------------------------------------------
// Automatic reconciliation — reached from claim()/done()
// ---------------------------------------------------------------------------

/// `claim` found a `ready` spec whose event log disagrees
/// ([`crate::validator::is_orphan`]). Reconciles the log to agree with the
/// spec — the spec file just passed every other claim check, so it, not
/// the log, is treated as authoritative here.
///
/// # Errors
/// [`LumenError::RecoveryRequired`] once [`crate::config::RecoveryConfig::max_attempts`]
/// is exceeded; `GIT`/`IO` from the underlying transaction otherwise.
pub fn auto_repair_orphan(engine: &Engine<'_>, id: &WuId, wu: &Wu) -> Result<(), LumenError> {
    let attempts = bump_attempts(engine, id)?;
    if attempts > engine.config.recovery.max_attempts {
        return Err(LumenError::RecoveryRequired {
            wu_id: id.clone(),
            detail: format!(
                "auto-repair exceeded {} attempt(s): spec says `ready` but the event log disagrees",
                engine.config.recovery.max_attempts
            ),
        });
    }

    let events_rel = engine.to_repo_relative(&engine.paths.events_path());
    let ts = engine.clock.now_rfc3339();
    let lane = wu.lane.clone();
    let id_owned = id.clone();

    micro_worktree::run(
        engine.repo,
        engine.remote(),
        engine.main_branch(),
        &engine.scratch_root(),
        engine.main_checkout(),
        MicroWorktreeRequest {
            operation: "recover-orphan",
            wu_id: id,
            push_only: false,
        },
        move |wt_path| {
            let log = EventLog::new(wt_path.join(&events_rel));
            log.append(&Event::Release {
                wu_id: id_owned.clone(),
                lane: Some(lane.clone()),
                ts: ts.clone(),
            })?;
            Ok(Some(WriteOutcome {
                commit_message: format!("recover(auto): reconcile {id_owned} to ready"),
                files: vec![events_rel.clone()],
            }))
        },
    )?;

    clear_attempts(engine, id);
    Ok(())
}

/// `done` found a spec already `done` (spec.md §4.10 zombie class: `done`
/// spec with a stale worktree, stale status doc, or a missing stamp/event
/// from a prior crash between steps). Repairs only what's actually
/// inconsistent; a WU that is already fully consistent is a true no-op
/// (spec.md §8 property 4).
///
/// # Errors
/// `GIT`/`IO` from the underlying transaction.
pub fn reconcile_done_zombie(engine: &Engine<'_>, id: &WuId, wu: &Wu) -> Result<(), LumenError> {
    let worktree_path = engine.paths.worktree_path(&wu.lane, id);
    let branch = engine.paths.lane_branch(&wu.lane, id);
    let stamp_path = engine.paths.stamp_path(id);

    let store = engine.state_store()?;
    let needs_done_event = store.status_of(id) != Some(WuStatus::Done);
    let needs_stamp = !stamp_path.exists();
    let status_doc = fs::read_to_string(engine.paths.status_path()).unwrap_or_default();
    let needs_doc_refresh = status_doc_lists_in_progress(&status_doc, id);
    let worktree_lingers = worktree_path.exists();
    let branch_lingers = engine.repo.branch_exists(&branch);

    if !needs_done_event && !needs_stamp && !needs_doc_refresh && !worktree_lingers && !branch_lingers {
        return Ok(());
    }

    if worktree_lingers {
        if let Err(e) = engine.repo.worktree_remove(&worktree_path) {
            tracing::warn!(%id, error = %e, "reconcile done zombie: worktree remove failed");
        }
    }
    if branch_lingers {
        if let Err(e) = engine.repo.branch_delete_local(&branch) {
            tracing::warn!(%id, error = %e, "reconcile done zombie: local branch delete failed");
        }
    }
    if let Err(e) = engine.repo.branch_delete_remote(engine.remote(), &branch) {
        tracing::warn!(%id, error = %e, "reconcile done zombie: remote branch delete failed");
    }
    if let Err(e) = engine.lane_lock().release(&wu.lane, id) {
        tracing::warn!(%id, error = %e, "reconcile done zombie: lane lock release failed");
    }

    if !needs_done_event && !needs_stamp && !needs_doc_refresh {
        return Ok(());
    }

    let all = engine.all_wus()?;
    let summaries = Engine::summaries(&all);
    let status_doc_new = crate::docs::render_status_doc(&summaries);
    let backlog_doc_new = crate::docs::render_backlog_doc(&summaries);

    let status_rel = engine.to_repo_relative(&engine.paths.status_path());
    let backlog_rel = engine.to_repo_relative(&engine.paths.backlog_path());
    let stamp_rel = engine.to_repo_relative(&stamp_path);
    let events_rel = engine.to_repo_relative(&engine.paths.events_path());
    let ts = engine.clock.now_rfc3339();
    let id_owned = id.clone();

    micro_worktree::run(
        engine.repo,
        engine.remote(),
        engine.main_branch(),
        &engine.scratch_root(),
        engine.main_checkout(),
        MicroWorktreeRequest {
            operation: "recover-zombie",
            wu_id: id,
            push_only: false,
        },
        move |wt_path| {
            let mut files = Vec::new();
            if needs_doc_refresh {
                let status_dest = wt_path.join(&status_rel);
                fs::write(&status_dest, &status_doc_new).map_err(|e| LumenError::Io {
                    path: Some(status_dest),
                    source: e,
                })?;
                let backlog_dest = wt_path.join(&backlog_rel);
                fs::write(&backlog_dest, &backlog_doc_new).map_err(|e| LumenError::Io {
                    path: Some(backlog_dest),
                    source: e,
                })?;
                files.push(status_rel.clone());
                files.push(backlog_rel.clone());
            }
            if needs_stamp {
                let dest = wt_path.join(&stamp_rel);
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(|e| LumenError::Io {
                        path: Some(parent.to_owned()),
                        source: e,
                    })?;
                }
                fs::write(&dest, "").map_err(|e| LumenError::Io {
                    path: Some(dest),
                    source: e,
                })?;
                files.push(stamp_rel.clone());
            }
            if needs_done_event {
                let log = EventLog::new(wt_path.join(&events_rel));
                log.append(&Event::Done {
                    wu_id: id_owned.clone(),
                    ts: ts.clone(),
                })?;
                files.push(events_rel.clone());
            }
            if files.is_empty() {
                return Ok(None);
            }
            Ok(Some(WriteOutcome {
                commit_message: format!("recover(auto): reconcile done zombie {id_owned}"),
                files,
            }))
        },
    )
}

fn status_doc_lists_in_progress(doc: &str, id: &WuId) -> bool {
    match (doc.find("## In Progress"), doc.find("## Completed")) {
        (Some(start), Some(end)) if start < end => doc[start..end].contains(id.as_str()),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Zombie/duplicate scan — `lumen recover --scan`
// ---------------------------------------------------------------------------

/// One of the four zombie conditions spec.md §4.10 "Zombie detection"
/// names (duplicate ids are reported separately, via [`DuplicateId`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZombieKind {
    /// Spec says `done` but a worktree still exists at its deterministic path.
    DoneWorktreeLingers,
    /// Spec says `done` but the status doc still lists it under "In Progress".
    DoneStatusDocStale,
    /// Spec says `in_progress` but the event log's latest event is `release`/`done`.
    InProgressLogReleased,
}

/// One detected zombie condition for one WU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Zombie {
    /// The affected WU.
    pub wu_id: WuId,
    /// Which condition was observed.
    pub kind: ZombieKind,
}

/// A WU id declared in more than one spec file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplicateId {
    /// The colliding id.
    pub wu_id: WuId,
    /// Every file that declares it.
    pub paths: Vec<PathBuf>,
}

/// Everything [`scan`] found.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Anomalies {
    /// Detected zombies.
    pub zombies: Vec<Zombie>,
    /// Detected duplicate ids.
    pub duplicates: Vec<DuplicateId>,
}

/// Scan every WU spec file for the zombie/duplicate conditions spec.md
/// §4.10 names, without repairing anything.
///
/// # Errors
/// Propagates [`LumenError`] from listing or reading WU spec files.
pub fn scan(engine: &Engine<'_>) -> Result<Anomalies, LumenError> {
    let entries = engine.list_wu_entries()?;
    let mut by_id: BTreeMap<WuId, Vec<PathBuf>> = BTreeMap::new();
    for (id, path) in &entries {
        by_id.entry(id.clone()).or_default().push(path.clone());
    }
    let duplicates: Vec<DuplicateId> = by_id
        .iter()
        .filter(|(_, paths)| paths.len() > 1)
        .map(|(id, paths)| DuplicateId {
            wu_id: id.clone(),
            paths: paths.clone(),
        })
        .collect();

    let store = engine.state_store()?;
    let status_doc = fs::read_to_string(engine.paths.status_path()).unwrap_or_default();

    let mut zombies = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for (id, path) in &entries {
        if !seen.insert(id.clone()) {
            continue;
        }
        let Ok(wu) = read_wu_any(path) else { continue };
        zombies.extend(detect_zombies(engine, &wu, &store, &status_doc).into_iter().map(|kind| Zombie {
            wu_id: id.clone(),
            kind,
        }));
    }
    Ok(Anomalies { zombies, duplicates })
}

fn detect_zombies(engine: &Engine<'_>, wu: &Wu, store: &StateStore, status_doc: &str) -> Vec<ZombieKind> {
    let mut kinds = Vec::new();
    if wu.status == WuStatus::Done {
        if engine.paths.worktree_path(&wu.lane, &wu.id).exists() {
            kinds.push(ZombieKind::DoneWorktreeLingers);
        }
        if status_doc_lists_in_progress(status_doc, &wu.id) {
            kinds.push(ZombieKind::DoneStatusDocStale);
        }
    }
    if wu.status == WuStatus::InProgress && matches!(store.status_of(&wu.id), Some(WuStatus::Ready) | Some(WuStatus::Done)) {
        kinds.push(ZombieKind::InProgressLogReleased);
    }
    kinds
}

// ---------------------------------------------------------------------------
// Manual recovery actions — `lumen recover <id> <action>`
// ---------------------------------------------------------------------------

/// The four recovery actions spec.md §4.10 defines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Resume: set `in_progress`, re-emit `claim`, preserve work.
    Resume,
    /// Reset: release everything, back to `ready`. Destructive.
    Reset,
    /// Nuke: reset, plus delete the WU spec itself. Destructive.
    Nuke,
    /// Cleanup: remove a leftover worktree from an already-`done` WU.
    Cleanup,
}

/// Options governing [`recover`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RecoverOptions {
    /// Required for `reset`/`nuke`.
    pub force: bool,
    /// Allows `reset`/`nuke` to proceed over an unclean worktree.
    pub discard_changes: bool,
}

/// Apply one manual recovery `action` to `id` (spec.md §4.10 "Recovery
/// actions").
///
/// # Errors
/// [`LumenError::RecoveryRequired`] if a precondition (`force`, a clean
/// worktree, a `done` status for `cleanup`) is not met; `GIT`/`IO` from
/// the underlying transaction.
pub fn recover(engine: &Engine<'_>, id: &WuId, action: RecoveryAction, opts: &RecoverOptions) -> Result<(), LumenError> {
    let wu = read_wu(&engine.paths.wu_path(id), id)?;
    match action {
        RecoveryAction::Resume => resume(engine, id, &wu),
        RecoveryAction::Reset => reset(engine, id, &wu, opts, false),
        RecoveryAction::Nuke => reset(engine, id, &wu, opts, true),
        RecoveryAction::Cleanup => cleanup(engine, id, &wu),
    }
}

fn claimed_branch_and_worktree(engine: &Engine<'_>, id: &WuId, wu: &Wu) -> (String, PathBuf) {
    match &wu.claim {
        Some(claim) => {
            let worktree = claim
                .worktree_path
                .as_deref()
                .map(|p| engine.main_checkout().join(p))
                .unwrap_or_else(|| engine.paths.worktree_path(&wu.lane, id));
            (claim.claimed_branch.clone(), worktree)
        }
        None => (engine.paths.lane_branch(&wu.lane, id), engine.paths.worktree_path(&wu.lane, id)),
    }
}

fn resume(engine: &Engine<'_>, id: &WuId, wu: &Wu) -> Result<(), LumenError> {
    let (branch, worktree_path) = claimed_branch_and_worktree(engine, id, wu);
    if !engine.repo.branch_exists(&branch) {
        return Err(LumenError::RecoveryRequired {
            wu_id: id.clone(),
            detail: format!("cannot resume: branch {branch} no longer exists; use `reset` or `nuke` instead"),
        });
    }
    if !worktree_path.exists() {
        engine
            .repo
            .worktree_add_existing(&worktree_path, &branch)
            .map_err(git_err("recreate worktree for resume"))?;
    }

    let remote_main = format!("{}/{}", engine.remote(), engine.main_branch());
    let baseline_main_sha = engine.repo.rev_parse(&remote_main).map_err(git_err("resolve baseline sha"))?;

    let mut resumed = wu.clone();
    resumed.status = WuStatus::InProgress;
    resumed.completion = None;
    resumed.claim = Some(crate::model::wu::ClaimMetadata {
        claimed_at: engine.clock.now_rfc3339(),
        session_id: "recovery".to_owned(),
        claimed_mode: crate::model::types::ClaimMode::Worktree,
        worktree_path: Some(engine.to_repo_relative(&worktree_path).to_string_lossy().into_owned()),
        claimed_branch: branch.clone(),
        baseline_main_sha,
    });

    let wu_rel = engine.to_repo_relative(&engine.paths.wu_path(id));
    let events_rel = engine.to_repo_relative(&engine.paths.events_path());
    let ts = engine.clock.now_rfc3339();
    let lane = wu.lane.clone();
    let id_owned = id.clone();

    micro_worktree::run(
        engine.repo,
        engine.remote(),
        engine.main_branch(),
        &engine.scratch_root(),
        engine.main_checkout(),
        MicroWorktreeRequest {
            operation: "recover-resume",
            wu_id: id,
            push_only: false,
        },
        move |wt_path| {
            write_wu(&wt_path.join(&wu_rel), &resumed)?;
            let log = EventLog::new(wt_path.join(&events_rel));
            log.append(&Event::Claim {
                wu_id: id_owned.clone(),
                lane: lane.clone(),
                title: None,
                session_id: Some("recovery".to_owned()),
                reason: Some("recovery: resume".to_owned()),
                ts: ts.clone(),
            })?;
            Ok(Some(WriteOutcome {
                commit_message: format!("recover(resume): {id_owned}"),
                files: vec![wu_rel.clone(), events_rel.clone()],
            }))
        },
    )?;

    if let Err(e) = engine.lane_lock().acquire(&wu.lane, id, engine.clock, None) {
        tracing::warn!(%id, error = %e, "resume: lane lock acquire failed (lane may already be at capacity)");
    }
    Ok(())
}

fn reset(engine: &Engine<'_>, id: &WuId, wu: &Wu, opts: &RecoverOptions, also_nuke_spec: bool) -> Result<(), LumenError> {
    if !opts.force {
        return Err(LumenError::RecoveryRequired {
            wu_id: id.clone(),
            detail: format!("{} requires force=true", if also_nuke_spec { "nuke" } else { "reset" }),
        });
    }
    let (branch, worktree_path) = claimed_branch_and_worktree(engine, id, wu);
    if worktree_path.exists() && !opts.discard_changes {
        let clean = engine.repo.is_clean(&worktree_path).map_err(git_err("check worktree cleanliness"))?;
        if !clean {
            return Err(LumenError::RecoveryRequired {
                wu_id: id.clone(),
                detail: "worktree has uncommitted changes; pass discard_changes=true to proceed".to_owned(),
            });
        }
    }

    let wu_rel = engine.to_repo_relative(&engine.paths.wu_path(id));
    let events_rel = engine.to_repo_relative(&engine.paths.events_path());
    let ts = engine.clock.now_rfc3339();
    let lane = wu.lane.clone();
    let id_owned = id.clone();

    let mut released = wu.clone();
    released.status = WuStatus::Ready;
    released.claim = None;
    released.completion = None;

    micro_worktree::run(
        engine.repo,
        engine.remote(),
        engine.main_branch(),
        &engine.scratch_root(),
        engine.main_checkout(),
        MicroWorktreeRequest {
            operation: if also_nuke_spec { "recover-nuke" } else { "recover-reset" },
            wu_id: id,
            push_only: false,
        },
        move |wt_path| {
            let wu_dest = wt_path.join(&wu_rel);
            if also_nuke_spec {
                if wu_dest.exists() {
                    fs::remove_file(&wu_dest).map_err(|e| LumenError::Io {
                        path: Some(wu_dest.clone()),
                        source: e,
                    })?;
                }
            } else {
                write_wu(&wu_dest, &released)?;
            }
            let log = EventLog::new(wt_path.join(&events_rel));
            log.append(&Event::Release {
                wu_id: id_owned.clone(),
                lane: Some(lane.clone()),
                ts: ts.clone(),
            })?;
            Ok(Some(WriteOutcome {
                commit_message: format!("recover({}): {id_owned}", if also_nuke_spec { "nuke" } else { "reset" }),
                files: vec![wu_rel.clone(), events_rel.clone()],
            }))
        },
    )?;

    if worktree_path.exists() {
        if let Err(e) = engine.repo.worktree_remove(&worktree_path) {
            tracing::warn!(%id, error = %e, "recover: worktree remove failed");
        }
    }
    if engine.repo.branch_exists(&branch) {
        if let Err(e) = engine.repo.branch_delete_local(&branch) {
            tracing::warn!(%id, error = %e, "recover: local branch delete failed");
        }
    }
    if let Err(e) = engine.repo.branch_delete_remote(engine.remote(), &branch) {
        tracing::warn!(%id, error = %e, "recover: remote branch delete failed");
    }
    if let Err(e) = engine.lane_lock().release(&wu.lane, id) {
        tracing::warn!(%id, error = %e, "recover: lane lock release failed");
    }
    Ok(())
}

fn cleanup(engine: &Engine<'_>, id: &WuId, wu: &Wu) -> Result<(), LumenError> {
    if wu.status != WuStatus::Done {
        return Err(LumenError::RecoveryRequired {
            wu_id: id.clone(),
            detail: "cleanup requires the WU to already be `done`; use `reset`/`nuke` otherwise".to_owned(),
        });
    }
    let worktree_path = engine.paths.worktree_path(&wu.lane, id);
    if worktree_path.exists() {
        engine.repo.worktree_remove(&worktree_path).map_err(git_err("cleanup: remove leftover worktree"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Duplicate-id repair — `lumen recover --repair-duplicates`
// ---------------------------------------------------------------------------

/// Repair every duplicate id [`scan`] would report (spec.md §4.10
/// "Duplicate-id repair"): the file whose name matches `<id>.yaml` stays
/// canonical; every other file declaring the same id is renamed under a
/// freshly assigned `WU-<n>`, its `id` field rewritten, its events
/// migrated by lane disambiguation, and (if it was `done`) its stamp
/// duplicated under the new id.
///
/// # Errors
/// Propagates [`LumenError`] from reading/writing WU spec files or the
/// event log, or from the underlying micro-worktree transaction.
pub fn repair_duplicate_ids(engine: &Engine<'_>) -> Result<Vec<WuId>, LumenError> {
    let entries = engine.list_wu_entries()?;
    let mut by_id: BTreeMap<WuId, Vec<PathBuf>> = BTreeMap::new();
    for (id, path) in &entries {
        by_id.entry(id.clone()).or_default().push(path.clone());
    }
    let mut next_n = entries.iter().map(|(id, _)| id.number()).max().unwrap_or(0) + 1;

    struct Reassignment {
        old_id: WuId,
        old_path: PathBuf,
        new_id: WuId,
        new_path: PathBuf,
        lane: Lane,
        was_done: bool,
    }

    let wu_dir = engine.paths.wu_dir();
    let mut reassignments = Vec::new();
    for (id, paths) in &by_id {
        if paths.len() <= 1 {
            continue;
        }
        let canonical_filename = format!("{id}.yaml");
        let mut sorted = paths.clone();
        sorted.sort();
        let canonical = sorted
            .iter()
            .find(|p| p.file_name().and_then(|f| f.to_str()) == Some(canonical_filename.as_str()))
            .unwrap_or(&sorted[0])
            .clone();
        for path in &sorted {
            if *path == canonical {
                continue;
            }
            let wu = read_wu_any(path)?;
            let new_id = WuId::from_number(next_n).map_err(|e| LumenError::Invariant { detail: e.to_string() })?;
            next_n += 1;
            reassignments.push(Reassignment {
                old_id: id.clone(),
                old_path: path.clone(),
                new_id: new_id.clone(),
                new_path: wu_dir.join(format!("{new_id}.yaml")),
                lane: wu.lane.clone(),
                was_done: wu.status == WuStatus::Done,
            });
        }
    }

    if reassignments.is_empty() {
        return Ok(Vec::new());
    }

    let events = engine.event_log().load()?;
    let mut rewritten_events = Vec::with_capacity(events.len());
    for event in events {
        let mut event = event;
        if let Some(reassignment) = reassignments.iter().find(|r| r.old_id == *event.wu_id()) {
            let matches_lane = match &event {
                Event::Claim { lane, .. } => *lane == reassignment.lane,
                Event::Release { lane: Some(lane), .. } => *lane == reassignment.lane,
                _ => false,
            };
            if matches_lane {
                event = retag_event(event, reassignment.new_id.clone());
            }
        }
        rewritten_events.push(event);
    }

    let events_rel = engine.to_repo_relative(&engine.paths.events_path());
    let new_ids: Vec<WuId> = reassignments.iter().map(|r| r.new_id.clone()).collect();
    let mut wu_writes: Vec<(PathBuf, PathBuf, Wu)> = Vec::new();
    let mut stamp_writes: Vec<PathBuf> = Vec::new();
    for reassignment in &reassignments {
        let mut wu = read_wu_any(&reassignment.old_path)?;
        wu.id = reassignment.new_id.clone();
        let old_rel = engine.to_repo_relative(&reassignment.old_path);
        let new_rel = engine.to_repo_relative(&reassignment.new_path);
        wu_writes.push((old_rel, new_rel, wu));
        if reassignment.was_done {
            stamp_writes.push(engine.to_repo_relative(&engine.paths.stamp_path(&reassignment.new_id)));
        }
    }

    micro_worktree::run(
        engine.repo,
        engine.remote(),
        engine.main_branch(),
        &engine.scratch_root(),
        engine.main_checkout(),
        MicroWorktreeRequest {
            operation: "recover-duplicates",
            wu_id: &new_ids[0],
            push_only: false,
        },
        move |wt_path| {
            let mut files = Vec::new();
            for (old_rel, new_rel, wu) in &wu_writes {
                let old_dest = wt_path.join(old_rel);
                if old_dest.exists() {
                    fs::remove_file(&old_dest).map_err(|e| LumenError::Io {
                        path: Some(old_dest.clone()),
                        source: e,
                    })?;
                }
                write_wu(&wt_path.join(new_rel), wu)?;
                files.push(old_rel.clone());
                files.push(new_rel.clone());
            }
            for stamp_rel in &stamp_writes {
                let dest = wt_path.join(stamp_rel);
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(|e| LumenError::Io {
                        path: Some(parent.to_owned()),
                        source: e,
                    })?;
                }
                fs::write(&dest, "").map_err(|e| LumenError::Io {
                    path: Some(dest.clone()),
                    source: e,
                })?;
                files.push(stamp_rel.clone());
            }
            let events_dest = wt_path.join(&events_rel);
            let mut body = String::new();
            for event in &rewritten_events {
                let line = serde_json::to_string(event).map_err(|e| LumenError::Parse {
                    path: events_dest.clone(),
                    line: None,
                    detail: e.to_string(),
                })?;
                body.push_str(&line);
                body.push('\n');
            }
            fs::write(&events_dest, body).map_err(|e| LumenError::Io {
                path: Some(events_dest),
                source: e,
            })?;
            files.push(events_rel.clone());
            Ok(Some(WriteOutcome {
                commit_message: "recover(repair-duplicates): reassign ids".to_owned(),
                files,
            }))
        },
    )?;

    Ok(new_ids)
}

fn retag_event(event: Event, new_id: WuId) -> Event {
    match event {
        Event::Claim { lane, title, session_id, reason, ts, .. } => Event::Claim {
            wu_id: new_id,
            lane,
            title,
            session_id,
            reason,
            ts,
        },
        Event::Release { lane, ts, .. } => Event::Release { wu_id: new_id, lane, ts },
        Event::Checkpoint {
            note,
            progress,
            next_steps,
            git_diff_stat,
            ts,
            ..
        } => Event::Checkpoint {
            wu_id: new_id,
            note,
            progress,
            next_steps,
            git_diff_stat,
            ts,
        },
        Event::Done { ts, .. } => Event::Done { wu_id: new_id, ts },
        Event::Block { reason, ts, .. } => Event::Block { wu_id: new_id, reason, ts },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::{LayoutConfig, LumenConfig};
    use crate::engine::{ClaimOptions, DoneOptions, Engine, NoGates};
    use crate::model::types::{Lane, WuType};
    use crate::model::wu::Tests;
    use crate::paths::Paths;
    use lumenflow_git::GitRepo;
    use std::path::Path;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git").args(args).current_dir(dir).status().unwrap();
        assert!(status.success(), "git {args:?} failed in {}", dir.display());
    }

    struct Fixture {
        _root: TempDir,
        work: PathBuf,
        paths: Paths,
        config: LumenConfig,
        clock: FixedClock,
    }

    impl Fixture {
        fn repo(&self) -> GitRepo {
            GitRepo::new(self.work.clone())
        }
    }

    fn setup() -> Fixture {
        let root = TempDir::new().unwrap();
        let bare = root.path().join("origin.git");
        fs::create_dir_all(&bare).unwrap();
        git(&bare, &["init", "--bare", "-q"]);

        let work = root.path().join("work");
        fs::create_dir_all(&work).unwrap();
        git(&work, &["init", "-q", "-b", "main"]);
        git(&work, &["config", "user.email", "t@example.com"]);
        git(&work, &["config", "user.name", "t"]);
        fs::write(work.join("README.md"), "hello\n").unwrap();
        git(&work, &["add", "."]);
        git(&work, &["commit", "-q", "-m", "init"]);
        git(&work, &["remote", "add", "origin", bare.to_str().unwrap()]);
        git(&work, &["push", "-q", "-u", "origin", "main"]);

        let paths = Paths::new(work.clone(), LayoutConfig::default());
        Fixture {
            _root: root,
            work,
            paths,
            config: LumenConfig::default(),
            clock: FixedClock(1_700_000_000),
        }
    }

    fn write_ready_wu(fx: &Fixture, n: u64, lane: &str, code_paths: &[&str]) -> WuId {
        let id = WuId::from_number(n).unwrap();
        let wu = Wu {
            id: id.clone(),
            title: format!("WU {n}"),
            lane: Lane::new(lane).unwrap(),
            kind: WuType::Feature,
            status: WuStatus::Ready,
            code_paths: code_paths.iter().map(|s| (*s).to_owned()).collect(),
            acceptance: vec!["it works".to_owned()],
            description: None,
            tests: Some(Tests {
                manual: vec!["run it".to_owned()],
            }),
            claim: None,
            completion: None,
        };
        write_wu(&fx.paths.wu_path(&id), &wu).unwrap();
        git(&fx.work, &["add", "."]);
        git(&fx.work, &["commit", "-q", "-m", format!("add WU-{n}")]);
        git(&fx.work, &["push", "-q", "origin", "main"]);
        id
    }

    #[test]
    fn second_claim_after_manual_release_repairs_orphan_and_succeeds() {
        let fx = setup();
        let id = write_ready_wu(&fx, 1, "Core", &["src/a.rs"]);
        let repo = fx.repo();
        let engine = Engine::new(&fx.paths, &fx.config, &fx.clock, &repo);
        let lane = Lane::new("Core").unwrap();

        engine.claim(&id, &lane, &ClaimOptions::default()).unwrap();

        // Simulate a crash that reverted the spec file to `ready` (e.g. a
        // restored backup) without reconciling the event log, which still
        // says `in_progress`.
        let mut wu = read_wu(&fx.paths.wu_path(&id), &id).unwrap();
        wu.status = WuStatus::Ready;
        wu.claim = None;
        write_wu(&fx.paths.wu_path(&id), &wu).unwrap();
        git(&fx.work, &["add", "."]);
        git(&fx.work, &["commit", "-q", "-m", "simulate reverted spec"]);
        git(&fx.work, &["push", "-q", "origin", "main"]);

        // A fresh claim auto-repairs the orphan (reconciling the log to
        // ready) and then proceeds normally.
        engine.claim(&id, &lane, &ClaimOptions::default()).unwrap();
        let claimed = read_wu(&fx.paths.wu_path(&id), &id).unwrap();
        assert_eq!(claimed.status, WuStatus::InProgress);
    }

    #[test]
    fn done_on_zombie_reconciles_stale_worktree() {
        let fx = setup();
        let id = write_ready_wu(&fx, 2, "Core", &["src/a.rs"]);
        let repo = fx.repo();
        let engine = Engine::new(&fx.paths, &fx.config, &fx.clock, &repo);
        let lane = Lane::new("Core").unwrap();

        engine.claim(&id, &lane, &ClaimOptions::default()).unwrap();
        let claimed = read_wu(&fx.paths.wu_path(&id), &id).unwrap();
        let claim = claimed.claim.clone().unwrap();
        let worktree_abs = fx.work.join(claim.worktree_path.as_deref().unwrap());
        fs::create_dir_all(worktree_abs.join("src")).unwrap();
        fs::write(worktree_abs.join("src/a.rs"), "fn main() {}\n").unwrap();
        git(&worktree_abs, &["add", "."]);
        git(&worktree_abs, &["commit", "-q", "-m", "do the work"]);
        git(&worktree_abs, &["push", "-q", "origin", &claim.claimed_branch]);

        engine.done(&id, &DoneOptions::default(), &NoGates).unwrap();
        assert!(!engine.paths.worktree_path(&lane, &id).exists());

        // Simulate a crash that left a stray directory behind at the
        // worktree's deterministic path after `done` already completed —
        // the zombie condition `reconcile_done_zombie` is meant to clean up.
        fs::create_dir_all(engine.paths.worktree_path(&lane, &id)).unwrap();
        assert!(engine.paths.worktree_path(&lane, &id).exists());

        engine.done(&id, &DoneOptions::default(), &NoGates).unwrap();
        assert!(!engine.paths.worktree_path(&lane, &id).exists());
    }

    #[test]
    fn scan_reports_no_anomalies_on_a_clean_repo() {
        let fx = setup();
        write_ready_wu(&fx, 3, "Core", &["src/a.rs"]);
        let repo = fx.repo();
        let engine = Engine::new(&fx.paths, &fx.config, &fx.clock, &repo);
        let anomalies = scan(&engine).unwrap();
        assert!(anomalies.zombies.is_empty());
        assert!(anomalies.duplicates.is_empty());
    }

    #[test]
    fn reset_without_force_is_refused() {
        let fx = setup();
        let id = write_ready_wu(&fx, 4, "Core", &["src/a.rs"]);
        let repo = fx.repo();
        let engine = Engine::new(&fx.paths, &fx.config, &fx.clock, &repo);
        engine.claim(&id, &Lane::new("Core").unwrap(), &ClaimOptions::default()).unwrap();

        let err = recover(&engine, &id, RecoveryAction::Reset, &RecoverOptions::default()).unwrap_err();
        assert!(matches!(err, LumenError::RecoveryRequired { .. }));
    }

    #[test]
    fn reset_releases_lane_and_returns_wu_to_ready() {
        let fx = setup();
        let id = write_ready_wu(&fx, 5, "Core", &["src/a.rs"]);
        let repo = fx.repo();
        let engine = Engine::new(&fx.paths, &fx.config, &fx.clock, &repo);
        let lane = Lane::new("Core").unwrap();
        engine.claim(&id, &lane, &ClaimOptions::default()).unwrap();

        let opts = RecoverOptions {
            force: true,
            discard_changes: true,
        };
        recover(&engine, &id, RecoveryAction::Reset, &opts).unwrap();

        let reset_wu = read_wu(&fx.paths.wu_path(&id), &id).unwrap();
        assert_eq!(reset_wu.status, WuStatus::Ready);
        assert!(reset_wu.claim.is_none());
        assert!(!engine.lane_lock().check(&lane, 1_700_000_100).unwrap().locked);

        // A fresh claim now succeeds without any orphan repair needed.
        engine.claim(&id, &lane, &ClaimOptions::default()).unwrap();
    }

    #[test]
    fn nuke_removes_the_spec_file_itself() {
        let fx = setup();
        let id = write_ready_wu(&fx, 6, "Core", &["src/a.rs"]);
        let repo = fx.repo();
        let engine = Engine::new(&fx.paths, &fx.config, &fx.clock, &repo);
        engine.claim(&id, &Lane::new("Core").unwrap(), &ClaimOptions::default()).unwrap();

        let opts = RecoverOptions {
            force: true,
            discard_changes: true,
        };
        recover(&engine, &id, RecoveryAction::Nuke, &opts).unwrap();
        assert!(!fx.paths.wu_path(&id).exists());
    }

    #[test]
    fn cleanup_requires_done_status() {
        let fx = setup();
        let id = write_ready_wu(&fx, 7, "Core", &["src/a.rs"]);
        let repo = fx.repo();
        let engine = Engine::new(&fx.paths, &fx.config, &fx.clock, &repo);
        engine.claim(&id, &Lane::new("Core").unwrap(), &ClaimOptions::default()).unwrap();

        let err = recover(&engine, &id, RecoveryAction::Cleanup, &RecoverOptions::default()).unwrap_err();
        assert!(matches!(err, LumenError::RecoveryRequired { .. }));
    }

    #[test]
    fn repair_duplicate_ids_reassigns_non_canonical_copy() {
        let fx = setup();
        let id = write_ready_wu(&fx, 8, "Core", &["src/a.rs"]);
        // A second file declaring the same id, under a non-matching filename.
        let dup_path = fx.paths.wu_dir().join("duplicate.yaml");
        let mut dup_wu = read_wu(&fx.paths.wu_path(&id), &id).unwrap();
        dup_wu.title = "Duplicate copy".to_owned();
        write_wu(&dup_path, &dup_wu).unwrap();
        git(&fx.work, &["add", "."]);
        git(&fx.work, &["commit", "-q", "-m", "introduce duplicate id"]);
        git(&fx.work, &["push", "-q", "origin", "main"]);

        let repo = fx.repo();
        let engine = Engine::new(&fx.paths, &fx.config, &fx.clock, &repo);

        let anomalies = scan(&engine).unwrap();
        assert_eq!(anomalies.duplicates.len(), 1);

        let new_ids = repair_duplicate_ids(&engine).unwrap();
        assert_eq!(new_ids.len(), 1);
        assert!(!dup_path.exists());
        assert!(fx.paths.wu_path(&new_ids[0]).exists());

        let anomalies_after = scan(&engine).unwrap();
        assert!(anomalies_after.duplicates.is_empty());
    }
}
