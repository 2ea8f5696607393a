//! Cross-module end-to-end scenarios (spec.md §8 "Concrete end-to-end
//! scenarios"). These drive [`Engine`] through a real `git` repository —
//! the only way to exercise the micro-worktree transactor, lane lock, and
//! event log together the way a caller actually would.

mod common;

use std::fs;

use common::{git, TestRepo};
use lumenflow::codec::read_wu;
use lumenflow::engine::{ClaimOptions, DoneOptions, Engine, NoGates};
use lumenflow::error::{ErrorKind, LumenError};
use lumenflow::model::types::{ClaimMode, Lane, WuStatus};
use lumenflow::recovery::{self, RecoverOptions, RecoveryAction};

/// Commit a change under one of a WU's worktrees satisfying its declared
/// `code_paths`, the way a claiming agent's own commits would.
fn commit_code_change(repo: &lumenflow_git::GitRepo, worktree: &std::path::Path, rel_path: &str, contents: &str) {
    let full = worktree.join(rel_path);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).expect("mkdir code path parent");
    }
    fs::write(&full, contents).expect("write code change");
    repo.commit_paths(worktree, &[std::path::PathBuf::from(rel_path)], "agent: implement WU")
        .expect("commit code change");
}

/// S1: happy-path claim -> done.
#[test]
fn s1_happy_path_claim_then_done() {
    let tr = TestRepo::new();
    let repo = tr.repo();
    let engine = Engine::new(&tr.paths, &tr.config, &tr.clock, &repo);
    let lane = Lane::new("Core").unwrap();
    let id = tr.write_ready_wu(42, "Core", &["src/a.rs"]);

    engine
        .claim(
            &id,
            &lane,
            &ClaimOptions {
                session_id: "session-1".to_owned(),
                mode: ClaimMode::Worktree,
                ..ClaimOptions::default()
            },
        )
        .expect("claim should succeed");

    // Main was fast-forwarded; spec is in_progress with claim metadata.
    let claimed = read_wu(&tr.paths.wu_path(&id), &id).expect("read claimed wu");
    assert_eq!(claimed.status, WuStatus::InProgress);
    let claim = claimed.claim.as_ref().expect("claim metadata present");
    assert_eq!(claim.claimed_mode, ClaimMode::Worktree);

    let worktree = tr.paths.worktree_path(&lane, &id);
    assert!(worktree.exists(), "claim worktree should exist");
    commit_code_change(&repo, &worktree, "src/a.rs", "fn a() {}\n");

    engine.done(&id, &DoneOptions::default(), &NoGates).expect("done should succeed");

    // Stamp exists, spec is done+locked, status/backlog docs reflect it,
    // event log ends claim then done (spec.md S1 "Expected").
    assert!(tr.paths.stamp_path(&id).exists(), "stamp should exist");
    let done_wu = read_wu(&tr.paths.wu_path(&id), &id).expect("read done wu");
    assert_eq!(done_wu.status, WuStatus::Done);
    assert!(done_wu.completion.as_ref().unwrap().locked);
    assert!(done_wu.claim.is_none());

    let status_doc = fs::read_to_string(tr.paths.status_path()).unwrap();
    assert!(!status_doc.contains("WU-42"), "status doc must not list WU-42 as in-progress");
    let backlog_doc = fs::read_to_string(tr.paths.backlog_path()).unwrap();
    assert_eq!(backlog_doc.matches("WU-42").count(), 1, "backlog must list WU-42 exactly once");

    let events = engine.event_log().load().expect("load events");
    let kinds: Vec<&'static str> = events.iter().map(lumenflow::model::event::Event::kind_str).collect();
    assert_eq!(kinds, vec!["claim", "done"]);

    let store = engine.state_store().expect("state store");
    assert_eq!(store.status_of(&id), Some(WuStatus::Done));
    assert!(!worktree.exists(), "claim worktree should have been removed");

    // Property 4: done . done is a no-op.
    let events_before = fs::read_to_string(tr.paths.events_path()).unwrap();
    engine.done(&id, &DoneOptions::default(), &NoGates).expect("second done is a no-op success");
    let events_after = fs::read_to_string(tr.paths.events_path()).unwrap();
    assert_eq!(events_before, events_after, "repeated done must not append new events");
}

/// S2: concurrent claim collision under WIP=1 — one succeeds, the other
/// observes LANE_BUSY and names the winner.
#[test]
fn s2_concurrent_claim_collision() {
    let tr = TestRepo::new();
    let repo = tr.repo();
    let engine = Engine::new(&tr.paths, &tr.config, &tr.clock, &repo);
    let lane = Lane::new("Core").unwrap();
    let id1 = tr.write_ready_wu(1, "Core", &["src/one.rs"]);
    let id2 = tr.write_ready_wu(2, "Core", &["src/two.rs"]);

    engine
        .claim(&id1, &lane, &ClaimOptions { session_id: "a".to_owned(), ..ClaimOptions::default() })
        .expect("first claim wins");

    let err = engine
        .claim(&id2, &lane, &ClaimOptions { session_id: "b".to_owned(), ..ClaimOptions::default() })
        .expect_err("second claim must fail");

    assert_eq!(err.kind(), ErrorKind::Concurrency);
    match err {
        LumenError::LaneBusy { holders, .. } => {
            assert!(holders.iter().any(|h| h.wu_id == id1), "LANE_BUSY must name the winning WU");
        }
        other => panic!("expected LaneBusy, got {other:?}"),
    }

    // No dangling worktree/branch for the loser.
    assert!(!tr.paths.worktree_path(&lane, &id2).exists());
    let wu2 = read_wu(&tr.paths.wu_path(&id2), &id2).unwrap();
    assert_eq!(wu2.status, WuStatus::Ready);
    assert!(wu2.claim.is_none());
}

/// S3: overlap refusal, then forced override.
#[test]
fn s3_overlap_refusal_then_forced() {
    let tr = TestRepo::new();
    let repo = tr.repo();
    let lane = Lane::new("Core").unwrap();
    let id1 = tr.write_ready_wu(1, "Core", &["src/api/"]);
    let id2 = tr.write_ready_wu(2, "Core", &["src/api/handler.rs"]);

    // Bump the WIP limit so both WUs can be in_progress in the same lane
    // at once without tripping LANE_BUSY first.
    let mut cfg = tr.config.clone();
    cfg.lanes.default_wip_limit = 2;
    let engine = Engine::new(&tr.paths, &cfg, &tr.clock, &repo);

    engine.claim(&id1, &lane, &ClaimOptions { session_id: "a".to_owned(), ..ClaimOptions::default() }).unwrap();

    let err = engine
        .claim(&id2, &lane, &ClaimOptions { session_id: "b".to_owned(), ..ClaimOptions::default() })
        .expect_err("overlap must refuse claim");
    assert_eq!(err.kind(), ErrorKind::Concurrency);
    match err {
        LumenError::Overlap { conflicts, .. } => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].wu_id, id1);
            assert!(conflicts[0].overlapping_paths.iter().any(|p| p.contains("handler.rs")));
        }
        other => panic!("expected Overlap, got {other:?}"),
    }
    assert_eq!(read_wu(&tr.paths.wu_path(&id2), &id2).unwrap().status, WuStatus::Ready);

    engine
        .claim(
            &id2,
            &lane,
            &ClaimOptions {
                session_id: "b".to_owned(),
                force_overlap: true,
                reason: Some("hotfix".to_owned()),
                ..ClaimOptions::default()
            },
        )
        .expect("forced overlap claim should succeed");
    assert_eq!(read_wu(&tr.paths.wu_path(&id2), &id2).unwrap().status, WuStatus::InProgress);

    let events = engine.event_log().load().unwrap();
    let claim_events: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            lumenflow::model::event::Event::Claim { wu_id, reason, .. } => Some((wu_id, reason)),
            _ => None,
        })
        .collect();
    assert!(
        claim_events.iter().any(|(wu_id, reason)| *wu_id == &id2 && reason.as_deref() == Some("hotfix")),
        "forced overlap claim must emit an audit reason"
    );
}

/// S5: duplicate-id repair is idempotent and preserves the canonical file.
#[test]
fn s5_duplicate_id_repair() {
    let tr = TestRepo::new();
    let repo = tr.repo();
    let engine = Engine::new(&tr.paths, &tr.config, &tr.clock, &repo);

    let canonical_id = tr.write_ready_wu(5, "Core", &["src/a.rs"]);
    // A colliding spec, same id, different lane, filed under a non-canonical name.
    let canonical = read_wu(&tr.paths.wu_path(&canonical_id), &canonical_id).unwrap();
    let mut dup = canonical.clone();
    dup.lane = Lane::new("Ops").unwrap();
    let dup_path = tr.paths.wu_dir().join("WU-5-copy.yaml");
    lumenflow::codec::write_wu(&dup_path, &dup).unwrap();
    git(&tr.work, &["add", "."]);
    git(&tr.work, &["commit", "-q", "-m", "add duplicate WU-5 copy"]);
    git(&tr.work, &["push", "-q", "origin", "main"]);

    let remapped = recovery::repair_duplicate_ids(&engine).expect("repair should succeed");
    assert_eq!(remapped.len(), 1);

    // Canonical file unchanged.
    let still_canonical = read_wu(&tr.paths.wu_path(&canonical_id), &canonical_id).unwrap();
    assert_eq!(still_canonical.lane.as_str(), "Core");
    assert!(!dup_path.exists(), "the copy must be renamed away");

    let new_id = &remapped[0];
    assert_ne!(new_id, &canonical_id);
    let renamed = read_wu(&tr.paths.wu_path(new_id), new_id).expect("renamed copy readable at its new id");
    assert_eq!(renamed.lane.as_str(), "Ops");

    // Idempotent: running again produces no further changes.
    let remapped_again = recovery::repair_duplicate_ids(&engine).expect("second run succeeds");
    assert!(remapped_again.is_empty(), "repeat repair should be a no-op");
}

/// S6: post-compaction recovery context contains every required section,
/// in order, within the size bound.
#[test]
fn s6_recover_context_sections_in_order() {
    let tr = TestRepo::new();
    let repo = tr.repo();
    let engine = Engine::new(&tr.paths, &tr.config, &tr.clock, &repo);
    let lane = Lane::new("Core").unwrap();
    let id = tr.write_ready_wu(42, "Core", &["src/a.rs", "src/b.rs"]);

    engine
        .claim(&id, &lane, &ClaimOptions { session_id: "s".to_owned(), ..ClaimOptions::default() })
        .expect("claim");

    engine
        .checkpoint(
            "tests green",
            &lumenflow::memory::CheckpointOptions {
                wu_id: Some(id.clone()),
                session_id: Some("s".to_owned()),
                progress: Some("tests green".to_owned()),
                next_steps: Some("refactor handler".to_owned()),
                trigger: Some("pre-compaction".to_owned()),
                git_diff_stat: Some("src/a.rs | 12 +".to_owned()),
            },
        )
        .expect("checkpoint");

    let out = engine.recover_context(&id, 8192).expect("recover_context");
    assert!(!out.truncated);
    assert!(out.markdown.len() <= 8192);

    let idx_title = out.markdown.find("Recovery").expect("recovery title present");
    let idx_checkpoint = out.markdown.find("tests green").expect("last checkpoint content present");
    let idx_next_steps = out.markdown.find("refactor handler").expect("next steps present");
    let idx_diff = out.markdown.find("src/a.rs | 12 +").expect("diff stat present");
    let idx_cli = out.markdown.find("lumen").expect("CLI reference present");

    assert!(idx_title < idx_checkpoint);
    assert!(idx_checkpoint <= idx_next_steps);
    assert!(idx_next_steps < idx_diff);
    assert!(idx_diff < idx_cli);
}

/// S4-adjacent: a WU whose spec already says `done` but whose worktree
/// directory still lingers (the crash happened between the `done` commit
/// landing and worktree teardown) is reconciled idempotently by a repeat
/// `done` call, not re-run from scratch (spec.md §4.10 zombie, §8 S4).
#[test]
fn s4_zombie_done_reconciled_on_repeat_call() {
    let tr = TestRepo::new();
    let repo = tr.repo();
    let engine = Engine::new(&tr.paths, &tr.config, &tr.clock, &repo);
    let lane = Lane::new("Core").unwrap();
    let id = tr.write_ready_wu(7, "Core", &["src/a.rs"]);

    engine
        .claim(&id, &lane, &ClaimOptions { session_id: "s".to_owned(), ..ClaimOptions::default() })
        .expect("claim");
    let worktree = tr.paths.worktree_path(&lane, &id);
    commit_code_change(&repo, &worktree, "src/a.rs", "fn a() {}\n");
    engine.done(&id, &DoneOptions::default(), &NoGates).expect("first done");
    assert!(!worktree.exists(), "a clean done should have already removed the worktree");

    // Simulate the crash: re-register a (now orphaned) worktree at the
    // exact path the done spec still remembers, as if teardown never ran.
    git(&tr.work, &["worktree", "add", "--detach", worktree.to_str().unwrap(), "HEAD"]);
    assert!(worktree.exists());

    let anomalies = engine.scan().expect("scan");
    assert!(
        anomalies.zombies.iter().any(|z| z.wu_id == id),
        "scan should detect the lingering worktree as a zombie for {id}"
    );

    engine.done(&id, &DoneOptions::default(), &NoGates).expect("reconciling done must succeed idempotently");

    assert!(!worktree.exists(), "reconciliation should remove the lingering worktree");
    let anomalies_after = engine.scan().expect("scan after reconcile");
    assert!(anomalies_after.zombies.is_empty(), "no zombies should remain after reconciliation");
}

/// `recover(... Reset)` on an in_progress WU returns it to ready and
/// releases the lane, matching spec.md §4.10.
#[test]
fn recover_reset_returns_wu_to_ready() {
    let tr = TestRepo::new();
    let repo = tr.repo();
    let engine = Engine::new(&tr.paths, &tr.config, &tr.clock, &repo);
    let lane = Lane::new("Core").unwrap();
    let id = tr.write_ready_wu(9, "Core", &["src/a.rs"]);

    engine
        .claim(&id, &lane, &ClaimOptions { session_id: "s".to_owned(), ..ClaimOptions::default() })
        .expect("claim");

    engine
        .recover(&id, RecoveryAction::Reset, &RecoverOptions { force: true, discard_changes: true })
        .expect("reset should succeed with force");

    let wu = read_wu(&tr.paths.wu_path(&id), &id).unwrap();
    assert_eq!(wu.status, WuStatus::Ready);
    assert!(wu.claim.is_none());
    assert!(!tr.paths.worktree_path(&lane, &id).exists());

    // The lane should be free again for a fresh claim.
    engine
        .claim(&id, &lane, &ClaimOptions { session_id: "s2".to_owned(), ..ClaimOptions::default() })
        .expect("lane should be free after reset");
}
