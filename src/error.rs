//! Unified error type for the WU lifecycle coordinator.
//!
//! Every variant maps to one of the failure kinds in spec.md §6/§7
//! (`VALIDATION`, `CONCURRENCY`, `IO`, `GIT`, `RECOVERY`, `FATAL`) via
//! [`LumenError::kind`], which the CLI uses to choose an exit code. Display
//! messages are agent-friendly: each names the failing invariant, the
//! observed state, and the smallest next command that unblocks the caller
//! (spec.md §7 "User-visible behavior"), matching the teacher's
//! `ManifoldError` convention.

use std::fmt;
use std::path::PathBuf;

use crate::model::types::{Lane, ValidationError, WuId};

/// The failure-kind partition from spec.md §6/§7, used to choose an exit
/// code and to decide retry/force-bypass eligibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Schema, spec-completeness, missing-manual-tests, lane-format,
    /// transition-not-allowed.
    Validation,
    /// Lane busy, code-path overlap, duplicate id.
    Concurrency,
    /// File not found, parse error, permission.
    Io,
    /// Push rejected, merge conflict, remote unavailable.
    Git,
    /// Zombie/orphan invariant violated across artifacts.
    Recovery,
    /// Internal invariant violation (state machine corruption, codec
    /// mismatch). Never recovered.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "VALIDATION"),
            Self::Concurrency => write!(f, "CONCURRENCY"),
            Self::Io => write!(f, "IO"),
            Self::Git => write!(f, "GIT"),
            Self::Recovery => write!(f, "RECOVERY"),
            Self::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Current holders of a contended lane lock, for `LANE_BUSY` remediation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaneHolder {
    /// The WU id currently holding (or one of the WUs holding, under
    /// WIP > 1) the lane.
    pub wu_id: WuId,
    /// When the lock was acquired (RFC 3339).
    pub acquired_at: String,
}

/// A declared-path overlap between the candidate WU and an in-progress one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlapConflict {
    /// The in-progress WU whose declared paths overlap.
    pub wu_id: WuId,
    /// The specific overlapping path patterns.
    pub overlapping_paths: Vec<String>,
}

/// The unified error type for every coordinator operation.
#[derive(Debug)]
pub enum LumenError {
    /// A WU spec file does not exist, fails to parse, or its `id` field
    /// disagrees with its filename.
    Preflight {
        /// The WU id the caller asked about.
        wu_id: WuId,
        /// What went wrong.
        detail: String,
    },

    /// Schema validation failed in a way the validator could not
    /// auto-fix, or auto-fix was not requested.
    SchemaViolation {
        /// The WU id.
        wu_id: WuId,
        /// The violated field(s)/rule(s).
        issues: Vec<String>,
    },

    /// The requested state transition is not admissible from the WU's
    /// current status.
    TransitionNotAllowed {
        /// The WU id.
        wu_id: WuId,
        /// Current status, as text (e.g. `"done"`).
        from: String,
        /// Requested transition, as text (e.g. `"claim"`).
        attempted: String,
    },

    /// Spec-completeness check failed (empty acceptance, placeholder
    /// text, missing test section where required).
    SpecIncomplete {
        /// The WU id.
        wu_id: WuId,
        /// Which completeness rule failed.
        reason: String,
    },

    /// A non-doc/process WU has no `tests.manual` entries at claim time.
    MissingManualTests {
        /// The WU id.
        wu_id: WuId,
    },

    /// A lane name does not match `^[A-Z][A-Za-z]*(: [A-Z][A-Za-z]*)?$`.
    InvalidLane {
        /// The offending lane text.
        lane: String,
        /// Why it is invalid.
        reason: String,
    },

    /// The changed-files set at `done` time doesn't match `code_paths`.
    CoverageViolation {
        /// The WU id.
        wu_id: WuId,
        /// Declared prefixes with zero observed changes.
        untouched_prefixes: Vec<String>,
        /// Changed paths that fall outside every declared prefix.
        out_of_scope_paths: Vec<String>,
    },

    /// `claim` could not acquire the lane lock.
    LaneBusy {
        /// The contended lane.
        lane: Lane,
        /// Current holder(s).
        holders: Vec<LaneHolder>,
    },

    /// `claim` found code-path overlap with an in-progress WU.
    Overlap {
        /// The candidate WU.
        wu_id: WuId,
        /// Conflicting in-progress WUs and their overlapping paths.
        conflicts: Vec<OverlapConflict>,
    },

    /// Two WU spec files declare the same `id`.
    DuplicateId {
        /// The colliding id.
        wu_id: WuId,
        /// File paths that declare it.
        paths: Vec<PathBuf>,
    },

    /// A file could not be found, read, or written.
    Io {
        /// The path involved, if known.
        path: Option<PathBuf>,
        /// The underlying error.
        source: std::io::Error,
    },

    /// A YAML/JSONL parse error.
    Parse {
        /// The path involved.
        path: PathBuf,
        /// 1-based line number, for JSONL parse errors.
        line: Option<usize>,
        /// Human-readable detail.
        detail: String,
    },

    /// A `git` subprocess operation failed, possibly after retries.
    Git {
        /// The failing step's name (spec.md §4.7: "surfaces a typed
        /// error that names the failing step").
        step: String,
        /// The underlying git error.
        source: lumenflow_git::GitError,
    },

    /// A zombie/orphan state was detected that auto-repair could not
    /// resolve, or the recovery attempt counter was exceeded.
    RecoveryRequired {
        /// The WU id.
        wu_id: WuId,
        /// What's inconsistent.
        detail: String,
    },

    /// `recover` found the target in a state a concurrent process has
    /// already mutated since the caller's analysis was produced.
    ConcurrentModification {
        /// The WU id.
        wu_id: WuId,
        /// What changed underneath the caller.
        detail: String,
    },

    /// An internal invariant was violated (state machine corruption,
    /// codec mismatch). Never recovered.
    Invariant {
        /// What invariant broke.
        detail: String,
    },
}

impl LumenError {
    /// The failure-kind partition this error belongs to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Preflight { .. }
            | Self::SchemaViolation { .. }
            | Self::TransitionNotAllowed { .. }
            | Self::SpecIncomplete { .. }
            | Self::MissingManualTests { .. }
            | Self::InvalidLane { .. }
            | Self::CoverageViolation { .. } => ErrorKind::Validation,
            Self::LaneBusy { .. } | Self::Overlap { .. } | Self::DuplicateId { .. } => {
                ErrorKind::Concurrency
            }
            Self::Io { .. } | Self::Parse { .. } => ErrorKind::Io,
            Self::Git { .. } => ErrorKind::Git,
            Self::RecoveryRequired { .. } | Self::ConcurrentModification { .. } => {
                ErrorKind::Recovery
            }
            Self::Invariant { .. } => ErrorKind::Fatal,
        }
    }

    /// `true` for errors the engine's retry-with-backoff path should
    /// attempt again (spec.md §7: "Git ... Retried with backoff").
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Git { source, .. } if source.is_transient())
    }
}

impl fmt::Display for LumenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preflight { wu_id, detail } => {
                write!(
                    f,
                    "{wu_id}: preflight failed: {detail}\n  To fix: check the WU spec file exists, parses, and its `id` field matches its filename."
                )
            }
            Self::SchemaViolation { wu_id, issues } => {
                write!(f, "{wu_id}: schema validation failed ({} issue(s)):", issues.len())?;
                for issue in issues {
                    write!(f, "\n  - {issue}")?;
                }
                write!(f, "\n  To fix: retry with `fix=true` to auto-apply fixable issues, or edit the spec directly.")
            }
            Self::TransitionNotAllowed { wu_id, from, attempted } => {
                write!(
                    f,
                    "{wu_id}: cannot {attempted} from status `{from}`.\n  To fix: check `lumen status {wu_id}` and use the transition the state machine allows from there."
                )
            }
            Self::SpecIncomplete { wu_id, reason } => {
                write!(
                    f,
                    "{wu_id}: spec is incomplete: {reason}\n  To fix: fill in the missing section, or pass `allow_incomplete=true` if this is intentional."
                )
            }
            Self::MissingManualTests { wu_id } => {
                write!(
                    f,
                    "{wu_id}: no `tests.manual` entries declared.\n  To fix: add at least one manual test step to the WU spec (not bypassable for feature/bug/refactor types)."
                )
            }
            Self::InvalidLane { lane, reason } => {
                write!(
                    f,
                    "invalid lane {lane:?}: {reason}\n  Lanes must match `^[A-Z][A-Za-z]*(: [A-Z][A-Za-z]*)?$`, e.g. \"Core\" or \"Backend: Auth\"."
                )
            }
            Self::CoverageViolation {
                wu_id,
                untouched_prefixes,
                out_of_scope_paths,
            } => {
                write!(f, "{wu_id}: code-path coverage check failed.")?;
                if !untouched_prefixes.is_empty() {
                    write!(f, "\n  Declared but untouched: {untouched_prefixes:?}")?;
                }
                if !out_of_scope_paths.is_empty() {
                    write!(f, "\n  Changed but undeclared: {out_of_scope_paths:?}")?;
                }
                write!(f, "\n  To fix: update `code_paths` to match what actually changed, then retry `done`.")
            }
            Self::LaneBusy { lane, holders } => {
                write!(f, "lane {lane:?} is at its WIP limit, held by:")?;
                for h in holders {
                    write!(f, "\n  - {} (since {})", h.wu_id, h.acquired_at)?;
                }
                write!(f, "\n  To fix: wait for the holder to `done`/`block`/`release`, or pass `force=true` to override.")
            }
            Self::Overlap { wu_id, conflicts } => {
                write!(f, "{wu_id}: declared code paths overlap with in-progress work:")?;
                for c in conflicts {
                    write!(f, "\n  - {} overlaps {:?}", c.wu_id, c.overlapping_paths)?;
                }
                write!(f, "\n  To fix: narrow `code_paths`, wait for the conflicting WU, or pass `force_overlap=true` with a `reason`.")
            }
            Self::DuplicateId { wu_id, paths } => {
                write!(f, "duplicate WU id {wu_id} declared in {} file(s):", paths.len())?;
                for p in paths {
                    write!(f, "\n  - {}", p.display())?;
                }
                write!(f, "\n  To fix: run duplicate-id repair to reassign ids to the non-canonical copies.")
            }
            Self::Io { path, source } => {
                if let Some(p) = path {
                    write!(f, "I/O error at {}: {source}\n  To fix: check file permissions and disk space.", p.display())
                } else {
                    write!(f, "I/O error: {source}\n  To fix: check file permissions and disk space.")
                }
            }
            Self::Parse { path, line, detail } => {
                write!(f, "parse error in {}", path.display())?;
                if let Some(n) = line {
                    write!(f, " at line {n}")?;
                }
                write!(f, ": {detail}")
            }
            Self::Git { step, source } => {
                write!(f, "git step `{step}` failed: {source}\n  To fix: check `git status`/`git remote -v` and retry.")
            }
            Self::RecoveryRequired { wu_id, detail } => {
                write!(
                    f,
                    "{wu_id}: manual intervention required: {detail}\n  To fix: inspect with `lumen status {wu_id}` and run `lumen recover {wu_id} <action> --force` once you've confirmed the right action."
                )
            }
            Self::ConcurrentModification { wu_id, detail } => {
                write!(
                    f,
                    "{wu_id}: state changed underneath this operation: {detail}\n  To fix: re-run the command; it will re-read the current state."
                )
            }
            Self::Invariant { detail } => {
                write!(f, "internal invariant violated: {detail}")
            }
        }
    }
}

impl std::error::Error for LumenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Git { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ValidationError> for LumenError {
    fn from(e: ValidationError) -> Self {
        Self::InvalidLane {
            lane: e.value,
            reason: e.reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wu(n: u64) -> WuId {
        WuId::from_number(n).unwrap()
    }

    #[test]
    fn kind_partitions_validation_variants() {
        let err = LumenError::MissingManualTests { wu_id: wu(1) };
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn kind_partitions_concurrency_variants() {
        let err = LumenError::LaneBusy {
            lane: Lane::new("Core").unwrap(),
            holders: vec![],
        };
        assert_eq!(err.kind(), ErrorKind::Concurrency);
    }

    #[test]
    fn display_lane_busy_lists_holders() {
        let err = LumenError::LaneBusy {
            lane: Lane::new("Core").unwrap(),
            holders: vec![LaneHolder {
                wu_id: wu(7),
                acquired_at: "2026-01-01T00:00:00Z".to_owned(),
            }],
        };
        let msg = format!("{err}");
        assert!(msg.contains("WU-7"));
        assert!(msg.contains("force=true"));
    }

    #[test]
    fn display_overlap_lists_conflicts() {
        let err = LumenError::Overlap {
            wu_id: wu(2),
            conflicts: vec![OverlapConflict {
                wu_id: wu(1),
                overlapping_paths: vec!["src/api/handler.go".to_owned()],
            }],
        };
        let msg = format!("{err}");
        assert!(msg.contains("WU-1"));
        assert!(msg.contains("handler.go"));
        assert!(msg.contains("force_overlap"));
    }

    #[test]
    fn display_coverage_violation_lists_both_sides() {
        let err = LumenError::CoverageViolation {
            wu_id: wu(3),
            untouched_prefixes: vec!["src/a.go".to_owned()],
            out_of_scope_paths: vec!["src/b.go".to_owned()],
        };
        let msg = format!("{err}");
        assert!(msg.contains("src/a.go"));
        assert!(msg.contains("src/b.go"));
    }

    #[test]
    fn from_validation_error_maps_to_invalid_lane() {
        let verr = ValidationError {
            kind: crate::model::types::ErrorKind::Lane,
            value: "core".to_owned(),
            reason: "must start uppercase".to_owned(),
        };
        let err: LumenError = verr.into();
        assert!(matches!(err, LumenError::InvalidLane { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn fatal_errors_are_not_retryable() {
        let err = LumenError::Invariant {
            detail: "x".to_owned(),
        };
        assert!(!err.is_retryable());
    }
}
