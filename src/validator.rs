//! Validator: preflight/schema/transition/completeness/test/lane-format/
//! coverage/orphan passes (spec.md §4.6).
//!
//! Each pass is a standalone function rather than a single monolithic
//! "validate everything" call, because the engine runs different subsets
//! at different lifecycle points (claim runs passes 1, 2, 4, 5, 6; done
//! runs 3, 7; recovery runs 8).

use crate::config::LumenConfig;
use crate::error::LumenError;
use crate::model::types::{Lane, WuStatus};
use crate::model::wu::Wu;
use crate::overlap::declared_matches;
use crate::state_store::StateStore;

/// The lifecycle transition a caller is attempting, for pass 3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// `ready -> in_progress`.
    Claim,
    /// `in_progress -> done`.
    Done,
    /// `in_progress -> blocked`.
    Block,
    /// `blocked -> in_progress`.
    Unblock,
    /// `in_progress|blocked -> ready` (via recovery `reset`).
    Release,
}

impl Transition {
    const fn label(self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Done => "done",
            Self::Block => "block",
            Self::Unblock => "unblock",
            Self::Release => "release",
        }
    }

    /// `true` if `from` admits this transition (spec.md §4.8 state
    /// machine diagram). `done -> *` is never admitted here; only the
    /// `nuke` recovery action may touch a done WU, and it bypasses the
    /// state machine entirely rather than going through a transition.
    const fn admits(self, from: WuStatus) -> bool {
        matches!(
            (self, from),
            (Self::Claim, WuStatus::Ready)
                | (Self::Done, WuStatus::InProgress)
                | (Self::Block, WuStatus::InProgress)
                | (Self::Unblock, WuStatus::Blocked)
                | (Self::Release, WuStatus::InProgress | WuStatus::Blocked)
        )
    }
}

/// Pass 3: state transition. Fails closed — anything not explicitly
/// admitted is rejected.
///
/// # Errors
/// Returns [`LumenError::TransitionNotAllowed`] if `from` does not admit
/// `transition`.
pub fn check_transition(wu: &Wu, transition: Transition) -> Result<(), LumenError> {
    if transition.admits(wu.status) {
        Ok(())
    } else {
        Err(LumenError::TransitionNotAllowed {
            wu_id: wu.id.clone(),
            from: wu.status.to_string(),
            attempted: transition.label().to_owned(),
        })
    }
}

/// Pass 4: spec completeness. `acceptance` must be non-empty and free of
/// placeholder text; `allow_incomplete` bypasses both checks.
///
/// # Errors
/// Returns [`LumenError::SpecIncomplete`] when `allow_incomplete` is
/// `false` and either condition fails.
pub fn check_spec_completeness(wu: &Wu, allow_incomplete: bool) -> Result<(), LumenError> {
    if allow_incomplete {
        return Ok(());
    }
    if wu.acceptance.is_empty() {
        return Err(LumenError::SpecIncomplete {
            wu_id: wu.id.clone(),
            reason: "acceptance criteria list is empty".to_owned(),
        });
    }
    const PLACEHOLDERS: [&str; 4] = ["TODO", "TBD", "FIXME", "..."];
    for entry in &wu.acceptance {
        let trimmed = entry.trim();
        if trimmed.is_empty() || PLACEHOLDERS.iter().any(|p| trimmed.eq_ignore_ascii_case(p)) {
            return Err(LumenError::SpecIncomplete {
                wu_id: wu.id.clone(),
                reason: format!("acceptance entry {entry:?} is empty or a placeholder"),
            });
        }
    }
    Ok(())
}

/// Pass 5: manual-tests-at-claim. Non-bypassable for types that don't
/// relax the requirement.
///
/// # Errors
/// Returns [`LumenError::MissingManualTests`] if `wu` requires manual
/// tests and has none declared.
pub fn check_manual_tests_at_claim(wu: &Wu) -> Result<(), LumenError> {
    if !wu.relaxes_test_requirement() && wu.manual_tests().is_empty() {
        return Err(LumenError::MissingManualTests { wu_id: wu.id.clone() });
    }
    Ok(())
}

/// Pass 6: lane format. [`Lane::new`] already enforces the pattern at
/// construction; this re-validates a raw string pulled from an untrusted
/// source (e.g. a CLI argument) before it becomes a `Lane`.
///
/// # Errors
/// Returns [`LumenError::InvalidLane`] if `raw` does not match
/// `^[A-Z][A-Za-z]*(: [A-Z][A-Za-z]*)?$`.
pub fn check_lane_format(raw: &str) -> Result<Lane, LumenError> {
    Lane::new(raw).map_err(Into::into)
}

/// Pass 7: code-path coverage at `done` time. Every declared `code_paths`
/// entry must cover at least one changed path, and every changed path
/// must be covered by at least one declared entry (spec.md §4.6 pass 7,
/// §8 property 9).
///
/// # Errors
/// Returns [`LumenError::CoverageViolation`] listing both untouched
/// declared prefixes and out-of-scope changed paths, if either is
/// non-empty.
pub fn check_code_path_coverage(wu: &Wu, changed_paths: &[String]) -> Result<(), LumenError> {
    let untouched_prefixes: Vec<String> = wu
        .code_paths
        .iter()
        .filter(|declared| !changed_paths.iter().any(|p| declared_matches(declared, p)))
        .cloned()
        .collect();
    let out_of_scope_paths: Vec<String> = changed_paths
        .iter()
        .filter(|p| !wu.code_paths.iter().any(|declared| declared_matches(declared, p)))
        .cloned()
        .collect();
    if untouched_prefixes.is_empty() && out_of_scope_paths.is_empty() {
        Ok(())
    } else {
        Err(LumenError::CoverageViolation {
            wu_id: wu.id.clone(),
            untouched_prefixes,
            out_of_scope_paths,
        })
    }
}

/// Pass 8: orphan detection. A WU is orphaned if its spec says `done` but
/// the event-log projection still shows it `in_progress`/`blocked`, or
/// vice versa a ready/blocked spec whose log says `done` (spec.md §4.10
/// "Zombie detection").
#[must_use]
pub fn is_orphan(wu: &Wu, store: &StateStore) -> bool {
    match store.status_of(&wu.id) {
        Some(logged) => logged != wu.status,
        None => false,
    }
}

/// Schema pass (2): auto-fixable normalization issues. Returns a
/// description of each fix that would be applied; callers that pass
/// `fix=true` should call [`apply_fixes`] afterward.
#[must_use]
pub fn fixable_schema_issues(wu: &Wu) -> Vec<String> {
    let mut issues = Vec::new();
    if wu.title != wu.title.trim() {
        issues.push("title has leading/trailing whitespace".to_owned());
    }
    if wu.code_paths.iter().any(|p| p.is_empty()) {
        issues.push("code_paths contains an empty entry".to_owned());
    }
    let mut seen = std::collections::HashSet::new();
    if wu.code_paths.iter().any(|p| !seen.insert(p.clone())) {
        issues.push("code_paths contains a duplicate entry".to_owned());
    }
    if wu.acceptance.iter().any(|a| a != a.trim()) {
        issues.push("an acceptance entry has leading/trailing whitespace".to_owned());
    }
    issues
}

/// Apply the fixes [`fixable_schema_issues`] describes, in place.
pub fn apply_schema_fixes(wu: &mut Wu) {
    wu.title = wu.title.trim().to_owned();
    wu.code_paths.retain(|p| !p.is_empty());
    let mut seen = std::collections::HashSet::new();
    wu.code_paths.retain(|p| seen.insert(p.clone()));
    for entry in &mut wu.acceptance {
        *entry = entry.trim().to_owned();
    }
}

/// Schema pass (2), non-fixable half: structural violations `fix=true`
/// cannot repair (an empty title, an invalid WU type string would have
/// already failed to parse, so in practice this only catches an empty
/// `lane`'s parent/subdomain split being reused as the title verbatim —
/// kept as a hook for future unfixable rules).
///
/// # Errors
/// Returns [`LumenError::SchemaViolation`] if any unfixable issue is
/// found.
pub fn check_schema(wu: &Wu, config: &LumenConfig) -> Result<(), LumenError> {
    let mut issues = Vec::new();
    if wu.title.trim().is_empty() {
        issues.push("title must not be empty".to_owned());
    }
    if wu.code_paths.is_empty() {
        issues.push("code_paths must declare at least one path".to_owned());
    }
    let wip_limit = config.lanes.wip_limit(wu.lane.as_str());
    if wip_limit == 0 {
        issues.push(format!("lane {:?} has a WIP limit of 0, which admits no claims", wu.lane.as_str()));
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(LumenError::SchemaViolation {
            wu_id: wu.id.clone(),
            issues,
        })
    }
}
