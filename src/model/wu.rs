//! The `Wu` record itself (spec.md §3, §6 "WU YAML schema").
//!
//! Claim and completion metadata are modeled as optional sub-structs so the
//! Rust type keeps the "present exactly when status is in the matching
//! set" invariant explicit rather than a loose bag of `Option` fields
//! (spec.md §9 design note: "Dynamic config/records ... Promote to tagged
//! records"), while the on-disk YAML stays flat (spec.md §6 lists
//! `claimed_at`, `locked`, etc. as plain top-level keys). Serializing the
//! sub-structs can use `#[serde(flatten)]` directly; deserializing cannot
//! (see the note on [`Wu`]'s `Deserialize` impl below).

use serde::{Deserialize, Serialize};

use super::types::{ClaimMode, Lane, WuId, WuStatus, WuType};

/// `tests` section of a WU spec.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tests {
    /// Manual test steps. Required non-empty for non-doc/process types at
    /// claim time (spec.md §4.6 pass 5).
    #[serde(default)]
    pub manual: Vec<String>,
}

/// Claim metadata: present only while `status ∈ {in_progress, blocked}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimMetadata {
    /// RFC 3339 claim timestamp.
    pub claimed_at: String,
    /// The agent session that claimed the WU.
    pub session_id: String,
    /// How the claim is materialized on disk.
    pub claimed_mode: ClaimMode,
    /// Worktree path, relative to the repo root (absent in `branch-only`
    /// and `branch-pr` modes, which don't create a dedicated worktree).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
    /// The branch the WU is being worked on.
    pub claimed_branch: String,
    /// `main`'s sha at claim time — the coverage-check baseline.
    pub baseline_main_sha: String,
}

/// Completion metadata: present only while `status == done`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMetadata {
    /// RFC 3339 completion timestamp.
    pub completed_at: String,
    /// Always `true` once present; a `done` WU is locked against further
    /// status mutation outside the `nuke` recovery action.
    pub locked: bool,
}

/// A Work Unit spec (spec.md §3).
///
/// Field order matches spec.md §6's top-level key list so that
/// `write_wu`'s "stable key order" guarantee reads the same in source as
/// on disk.
///
/// `Deserialize` is hand-written rather than derived: `serde`'s
/// `#[serde(flatten)]` on an `Option<Struct>` always calls `visit_some`
/// (`FlatMapDeserializer::deserialize_option` ignores the "is this key
/// present at all" question), so a derived impl would try to build
/// `ClaimMetadata`/`CompletionMetadata` from an empty flat map for every
/// `ready` WU and fail with "missing field claimed_at". Deserializing
/// through a flat shadow record and assembling the optional sub-structs
/// by hand keeps the on-disk schema flat (spec.md §6) while giving the
/// claim/completion fields real "all or nothing" presence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Wu {
    /// Unique identifier; must equal the id encoded in the file name.
    pub id: WuId,
    /// Short title.
    pub title: String,
    /// Coordination lane.
    pub lane: Lane,
    /// Work category.
    #[serde(rename = "type")]
    pub kind: WuType,
    /// Lifecycle status.
    pub status: WuStatus,
    /// Declared scope of allowed mutations.
    pub code_paths: Vec<String>,
    /// Acceptance criteria.
    pub acceptance: Vec<String>,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Test requirements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<Tests>,
    /// Present iff `status ∈ {in_progress, blocked}`.
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub claim: Option<ClaimMetadata>,
    /// Present iff `status == done`.
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionMetadata>,
}

/// Flat on-disk shape of a [`Wu`], mirroring spec.md §6's top-level key
/// list exactly; claim/completion fields are read individually so an
/// absent one deserializes to `None` instead of tripping the
/// `flatten`-on-`Option<Struct>` pitfall described on [`Wu`].
#[derive(Deserialize)]
struct WuShadow {
    id: WuId,
    title: String,
    lane: Lane,
    #[serde(rename = "type")]
    kind: WuType,
    status: WuStatus,
    code_paths: Vec<String>,
    acceptance: Vec<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tests: Option<Tests>,
    #[serde(default)]
    claimed_at: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    claimed_mode: Option<ClaimMode>,
    #[serde(default)]
    worktree_path: Option<String>,
    #[serde(default)]
    claimed_branch: Option<String>,
    #[serde(default)]
    baseline_main_sha: Option<String>,
    #[serde(default)]
    completed_at: Option<String>,
    #[serde(default)]
    locked: Option<bool>,
}

impl<'de> Deserialize<'de> for Wu {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let shadow = WuShadow::deserialize(deserializer)?;

        let claim = match (
            shadow.claimed_at,
            shadow.session_id,
            shadow.claimed_mode,
            shadow.claimed_branch,
            shadow.baseline_main_sha,
        ) {
            (None, None, None, None, None) => None,
            (Some(claimed_at), Some(session_id), Some(claimed_mode), Some(claimed_branch), Some(baseline_main_sha)) => {
                Some(ClaimMetadata {
                    claimed_at,
                    session_id,
                    claimed_mode,
                    worktree_path: shadow.worktree_path,
                    claimed_branch,
                    baseline_main_sha,
                })
            }
            _ => {
                return Err(serde::de::Error::custom(
                    "incomplete claim metadata: claimed_at, session_id, claimed_mode, \
                     claimed_branch, baseline_main_sha must all be present or all absent",
                ));
            }
        };

        let completion = match (shadow.completed_at, shadow.locked) {
            (None, None) => None,
            (Some(completed_at), Some(locked)) => Some(CompletionMetadata { completed_at, locked }),
            _ => {
                return Err(serde::de::Error::custom(
                    "incomplete completion metadata: completed_at and locked must both be present or both absent",
                ));
            }
        };

        Ok(Wu {
            id: shadow.id,
            title: shadow.title,
            lane: shadow.lane,
            kind: shadow.kind,
            status: shadow.status,
            code_paths: shadow.code_paths,
            acceptance: shadow.acceptance,
            description: shadow.description,
            tests: shadow.tests,
            claim,
            completion,
        })
    }
}

/// Why [`Wu::check_invariants`] rejected a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvariantViolation(pub String);

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for InvariantViolation {}

impl Wu {
    /// Check the structural invariants from spec.md §3:
    /// claim metadata present ⇔ `status ∈ {in_progress, blocked}`;
    /// `locked ⇔ status == done`; completion metadata present ⇔
    /// `status == done`.
    ///
    /// # Errors
    /// Returns [`InvariantViolation`] describing the first violation found.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let wants_claim = self.status.has_claim_metadata();
        if wants_claim != self.claim.is_some() {
            return Err(InvariantViolation(format!(
                "{}: status `{}` requires claim metadata {}, but it is {}",
                self.id,
                self.status,
                if wants_claim { "present" } else { "absent" },
                if self.claim.is_some() { "present" } else { "absent" }
            )));
        }
        let wants_completion = matches!(self.status, WuStatus::Done);
        if wants_completion != self.completion.is_some() {
            return Err(InvariantViolation(format!(
                "{}: status `{}` requires completion metadata {}, but it is {}",
                self.id,
                self.status,
                if wants_completion { "present" } else { "absent" },
                if self.completion.is_some() { "present" } else { "absent" }
            )));
        }
        if let Some(completion) = &self.completion {
            if !completion.locked {
                return Err(InvariantViolation(format!(
                    "{}: status `done` requires locked=true",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// `true` if this WU's type relaxes the manual-tests-at-claim
    /// requirement (spec.md §3).
    #[must_use]
    pub fn relaxes_test_requirement(&self) -> bool {
        self.kind.relaxes_test_requirement()
    }

    /// The declared manual test steps, empty if `tests` is absent.
    #[must_use]
    pub fn manual_tests(&self) -> &[String] {
        self.tests.as_ref().map_or(&[], |t| t.manual.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_ready(n: u64) -> Wu {
        Wu {
            id: WuId::from_number(n).unwrap(),
            title: "Do the thing".to_owned(),
            lane: Lane::new("Core").unwrap(),
            kind: WuType::Feature,
            status: WuStatus::Ready,
            code_paths: vec!["src/a.rs".to_owned()],
            acceptance: vec!["it works".to_owned()],
            description: None,
            tests: Some(Tests {
                manual: vec!["run it".to_owned()],
            }),
            claim: None,
            completion: None,
        }
    }

    #[test]
    fn ready_wu_passes_invariants() {
        assert!(minimal_ready(1).check_invariants().is_ok());
    }

    #[test]
    fn ready_wu_with_claim_metadata_fails_invariants() {
        let mut wu = minimal_ready(1);
        wu.claim = Some(ClaimMetadata {
            claimed_at: "2026-01-01T00:00:00Z".to_owned(),
            session_id: "s1".to_owned(),
            claimed_mode: ClaimMode::Worktree,
            worktree_path: Some("wt/core-wu-1".to_owned()),
            claimed_branch: "lane/core/wu-1".to_owned(),
            baseline_main_sha: "a".repeat(40),
        });
        assert!(wu.check_invariants().is_err());
    }

    #[test]
    fn in_progress_without_claim_metadata_fails_invariants() {
        let mut wu = minimal_ready(1);
        wu.status = WuStatus::InProgress;
        assert!(wu.check_invariants().is_err());
    }

    #[test]
    fn in_progress_with_claim_metadata_passes() {
        let mut wu = minimal_ready(1);
        wu.status = WuStatus::InProgress;
        wu.claim = Some(ClaimMetadata {
            claimed_at: "2026-01-01T00:00:00Z".to_owned(),
            session_id: "s1".to_owned(),
            claimed_mode: ClaimMode::Worktree,
            worktree_path: Some("wt/core-wu-1".to_owned()),
            claimed_branch: "lane/core/wu-1".to_owned(),
            baseline_main_sha: "a".repeat(40),
        });
        assert!(wu.check_invariants().is_ok());
    }

    #[test]
    fn done_requires_locked_true() {
        let mut wu = minimal_ready(1);
        wu.status = WuStatus::Done;
        wu.completion = Some(CompletionMetadata {
            completed_at: "2026-01-01T00:00:00Z".to_owned(),
            locked: false,
        });
        assert!(wu.check_invariants().is_err());
    }

    #[test]
    fn done_with_locked_true_passes() {
        let mut wu = minimal_ready(1);
        wu.status = WuStatus::Done;
        wu.completion = Some(CompletionMetadata {
            completed_at: "2026-01-01T00:00:00Z".to_owned(),
            locked: true,
        });
        assert!(wu.check_invariants().is_ok());
    }

    #[test]
    fn ready_wu_yaml_with_no_claim_or_completion_keys_deserializes_to_none() {
        let yaml = "id: WU-1\n\
                     title: Do the thing\n\
                     lane: Core\n\
                     type: feature\n\
                     status: ready\n\
                     code_paths:\n  - src/a.rs\n\
                     acceptance:\n  - it works\n";
        let wu: Wu = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(wu.status, WuStatus::Ready);
        assert!(wu.claim.is_none());
        assert!(wu.completion.is_none());
        assert!(wu.check_invariants().is_ok());
    }

    #[test]
    fn partial_claim_metadata_is_rejected() {
        let yaml = "id: WU-1\n\
                     title: Do the thing\n\
                     lane: Core\n\
                     type: feature\n\
                     status: in_progress\n\
                     code_paths:\n  - src/a.rs\n\
                     acceptance:\n  - it works\n\
                     claimed_at: '2026-01-01T00:00:00Z'\n";
        let err = serde_yaml::from_str::<Wu>(yaml).unwrap_err();
        assert!(err.to_string().contains("incomplete claim metadata"));
    }

    #[test]
    fn yaml_round_trip_preserves_claim_metadata() {
        let mut wu = minimal_ready(5);
        wu.status = WuStatus::InProgress;
        wu.claim = Some(ClaimMetadata {
            claimed_at: "2026-01-01T00:00:00Z".to_owned(),
            session_id: "s1".to_owned(),
            claimed_mode: ClaimMode::BranchOnly,
            worktree_path: None,
            claimed_branch: "lane/core/wu-5".to_owned(),
            baseline_main_sha: "b".repeat(40),
        });
        let yaml = serde_yaml::to_string(&wu).unwrap();
        assert!(!yaml.contains("worktree_path"));
        let parsed: Wu = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, wu);
    }

    #[test]
    fn doc_type_relaxes_test_requirement() {
        let mut wu = minimal_ready(1);
        wu.kind = WuType::Documentation;
        assert!(wu.relaxes_test_requirement());
    }
}
