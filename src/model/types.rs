//! Core validated identifier types for the WU lifecycle coordinator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// The kind of value that failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A [`WuId`] validation error.
    WuId,
    /// A [`Lane`] validation error.
    Lane,
    /// A [`MemNodeId`] validation error.
    MemNodeId,
    /// A git object id validation error.
    GitOid,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WuId => write!(f, "WuId"),
            Self::Lane => write!(f, "Lane"),
            Self::MemNodeId => write!(f, "MemNodeId"),
            Self::GitOid => write!(f, "GitOid"),
        }
    }
}

/// A validation error for a core identifier type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// What kind of value was being validated.
    pub kind: ErrorKind,
    /// The invalid value.
    pub value: String,
    /// Human-readable explanation.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?} — {}", self.kind, self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// WuId
// ---------------------------------------------------------------------------

/// A validated Work Unit identifier: `WU-<n>` with `n` a positive integer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WuId(String);

impl WuId {
    /// Create a `WuId` from a string, validating the `WU-<n>` pattern.
    ///
    /// # Errors
    /// Returns an error if the string is not `WU-` followed by a positive
    /// integer with no leading zero (other than `0` itself, which is not
    /// a positive integer and is therefore also rejected).
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Construct the `n`th `WuId` directly (`n` must be nonzero).
    ///
    /// # Errors
    /// Returns an error if `n` is zero.
    pub fn from_number(n: u64) -> Result<Self, ValidationError> {
        if n == 0 {
            return Err(ValidationError {
                kind: ErrorKind::WuId,
                value: "0".to_owned(),
                reason: "WU number must be positive".to_owned(),
            });
        }
        Ok(Self(format!("WU-{n}")))
    }

    /// The numeric suffix.
    ///
    /// # Panics
    /// Never panics: validation at construction guarantees `WU-<digits>`
    /// with `<digits>` parseable as `u64`.
    #[must_use]
    pub fn number(&self) -> u64 {
        self.0
            .strip_prefix("WU-")
            .and_then(|n| n.parse().ok())
            .unwrap_or_else(|| unreachable!("WuId invariant: always WU-<positive integer>"))
    }

    /// Return the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        let err = |reason: &str| ValidationError {
            kind: ErrorKind::WuId,
            value: s.to_owned(),
            reason: reason.to_owned(),
        };
        let Some(digits) = s.strip_prefix("WU-") else {
            return Err(err("must start with 'WU-'"));
        };
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(err("suffix after 'WU-' must be all digits"));
        }
        if digits.len() > 1 && digits.starts_with('0') {
            return Err(err("suffix must not have a leading zero"));
        }
        let n: u64 = digits
            .parse()
            .map_err(|_| err("suffix must fit in a 64-bit integer"))?;
        if n == 0 {
            return Err(err("WU number must be positive"));
        }
        Ok(())
    }
}

impl fmt::Display for WuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WuId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for WuId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<WuId> for String {
    fn from(id: WuId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// Lane
// ---------------------------------------------------------------------------

/// A validated lane name: `^[A-Z][A-Za-z]*(: [A-Z][A-Za-z]*)?$` (spec.md
/// §4.6 pass 6).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Lane(String);

impl Lane {
    /// Create a `Lane`, validating the capitalized-word(s) format.
    ///
    /// # Errors
    /// Returns an error if `s` does not match
    /// `^[A-Z][A-Za-z]*(: [A-Z][A-Za-z]*)?$`.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// The lane name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `Parent` / `Subdomain` split, if this is a `Parent: Subdomain`
    /// lane; `None` for a single-word lane.
    #[must_use]
    pub fn parent_subdomain(&self) -> Option<(&str, &str)> {
        self.0.split_once(": ")
    }

    /// Kebab-case form used in filesystem paths and branch/ref names, e.g.
    /// `"Core"` → `"core"`, `"Parent: Subdomain"` → `"parent-subdomain"`.
    #[must_use]
    pub fn kebab(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if c == ':' {
                    '-'
                } else if c.is_ascii_uppercase() {
                    c.to_ascii_lowercase()
                } else if c == ' ' {
                    '-'
                } else {
                    c
                }
            })
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-")
    }

    fn word_ok(w: &str) -> bool {
        let mut chars = w.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
            && chars.all(|c| c.is_ascii_alphabetic())
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        let err = || ValidationError {
            kind: ErrorKind::Lane,
            value: s.to_owned(),
            reason: "must match ^[A-Z][A-Za-z]*(: [A-Z][A-Za-z]*)?$".to_owned(),
        };
        match s.split_once(": ") {
            None => {
                if Self::word_ok(s) {
                    Ok(())
                } else {
                    Err(err())
                }
            }
            Some((parent, sub)) => {
                if Self::word_ok(parent) && Self::word_ok(sub) {
                    Ok(())
                } else {
                    Err(err())
                }
            }
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Lane {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Lane {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<Lane> for String {
    fn from(lane: Lane) -> Self {
        lane.0
    }
}

// ---------------------------------------------------------------------------
// MemNodeId
// ---------------------------------------------------------------------------

/// A validated memory node identifier: `mem-[a-z0-9]{4}`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemNodeId(String);

impl MemNodeId {
    /// Create a `MemNodeId` from a string, validating `mem-[a-z0-9]{4}`.
    ///
    /// # Errors
    /// Returns an error if `s` is not `"mem-"` followed by exactly 4
    /// lowercase alphanumeric characters.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Build a `MemNodeId` deterministically from arbitrary content bytes,
    /// via [`terseid::hash`] — the same "hash the content, truncate to a
    /// short id" approach used for conflict ids elsewhere in this
    /// ecosystem.
    #[must_use]
    pub fn from_content(bytes: &[u8]) -> Self {
        let suffix = terseid::hash(bytes, 4);
        Self(format!("mem-{suffix}"))
    }

    /// Return the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        let Some(suffix) = s.strip_prefix("mem-") else {
            return Err(ValidationError {
                kind: ErrorKind::MemNodeId,
                value: s.to_owned(),
                reason: "must start with 'mem-'".to_owned(),
            });
        };
        if suffix.len() != 4 || !suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
            return Err(ValidationError {
                kind: ErrorKind::MemNodeId,
                value: s.to_owned(),
                reason: "suffix must be exactly 4 lowercase alphanumeric characters".to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for MemNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MemNodeId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for MemNodeId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<MemNodeId> for String {
    fn from(id: MemNodeId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// WuStatus
// ---------------------------------------------------------------------------

/// A Work Unit's lifecycle status (spec.md §3, §4.8 state machine).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WuStatus {
    /// Not yet claimed by any agent.
    Ready,
    /// Claimed and being worked on.
    InProgress,
    /// Claimed but blocked on something external.
    Blocked,
    /// Completed and locked.
    Done,
}

impl fmt::Display for WuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Blocked => write!(f, "blocked"),
            Self::Done => write!(f, "done"),
        }
    }
}

impl WuStatus {
    /// `true` for `in_progress` and `blocked` — the statuses that carry
    /// claim metadata.
    #[must_use]
    pub const fn has_claim_metadata(self) -> bool {
        matches!(self, Self::InProgress | Self::Blocked)
    }
}

// ---------------------------------------------------------------------------
// WuType
// ---------------------------------------------------------------------------

/// The category of work a WU represents.
///
/// `Documentation` and `Process` relax the manual-tests-at-claim
/// requirement (spec.md §4.6 pass 5). The trailing `Other` variant keeps
/// the type open-ended, matching the spec's `{feature, bug, refactor,
/// documentation, process, …}`. Serializes as a plain lowercase string
/// rather than an internally-tagged enum, since `Other` must round-trip
/// through arbitrary type names a schema-only enum can't express.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum WuType {
    /// New functionality.
    Feature,
    /// A defect fix.
    Bug,
    /// Internal restructuring with no behavior change.
    Refactor,
    /// Documentation-only work. Relaxes test requirements.
    Documentation,
    /// Process/tooling work. Relaxes test requirements.
    Process,
    /// Any other declared type.
    Other(String),
}

impl WuType {
    /// `true` for types that relax the manual-tests-at-claim requirement
    /// (spec.md §3: "documentation/process relax test requirements").
    #[must_use]
    pub fn relaxes_test_requirement(&self) -> bool {
        matches!(self, Self::Documentation | Self::Process)
    }
}

impl fmt::Display for WuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Feature => write!(f, "feature"),
            Self::Bug => write!(f, "bug"),
            Self::Refactor => write!(f, "refactor"),
            Self::Documentation => write!(f, "documentation"),
            Self::Process => write!(f, "process"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for WuType {
    fn from(s: &str) -> Self {
        match s {
            "feature" => Self::Feature,
            "bug" => Self::Bug,
            "refactor" => Self::Refactor,
            "documentation" => Self::Documentation,
            "process" => Self::Process,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl Serialize for WuType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for WuType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

// ---------------------------------------------------------------------------
// ClaimMode
// ---------------------------------------------------------------------------

/// How a claimed WU is materialized on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClaimMode {
    /// A dedicated worktree is created for the WU (the default).
    Worktree,
    /// Work happens on a branch in the caller's existing checkout; no
    /// worktree is created.
    BranchOnly,
    /// Work happens on a branch intended to be merged via a pull request.
    BranchPr,
}

impl fmt::Display for ClaimMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Worktree => write!(f, "worktree"),
            Self::BranchOnly => write!(f, "branch-only"),
            Self::BranchPr => write!(f, "branch-pr"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wu_id_accepts_valid() {
        assert!(WuId::new("WU-1").is_ok());
        assert!(WuId::new("WU-42").is_ok());
        assert_eq!(WuId::new("WU-42").unwrap().number(), 42);
    }

    #[test]
    fn wu_id_rejects_invalid() {
        assert!(WuId::new("WU-0").is_err());
        assert!(WuId::new("WU-01").is_err());
        assert!(WuId::new("wu-1").is_err());
        assert!(WuId::new("WU-").is_err());
        assert!(WuId::new("WU-x").is_err());
    }

    #[test]
    fn lane_accepts_single_word_and_parent_subdomain() {
        assert!(Lane::new("Core").is_ok());
        assert!(Lane::new("Parent: Subdomain").is_ok());
        assert_eq!(Lane::new("Core").unwrap().kebab(), "core");
        assert_eq!(Lane::new("Parent: Subdomain").unwrap().kebab(), "parent-subdomain");
    }

    #[test]
    fn lane_rejects_invalid() {
        assert!(Lane::new("core").is_err());
        assert!(Lane::new("Core Extra").is_err());
        assert!(Lane::new("Parent:Subdomain").is_err());
        assert!(Lane::new("Parent: subdomain").is_err());
    }

    #[test]
    fn mem_node_id_accepts_and_rejects() {
        assert!(MemNodeId::new("mem-ab12").is_ok());
        assert!(MemNodeId::new("mem-AB12").is_err());
        assert!(MemNodeId::new("mem-ab1").is_err());
        assert!(MemNodeId::new("mm-ab12").is_err());
    }

    #[test]
    fn mem_node_id_from_content_is_deterministic() {
        let a = MemNodeId::from_content(b"hello world");
        let b = MemNodeId::from_content(b"hello world");
        assert_eq!(a, b);
        assert!(MemNodeId::new(a.as_str()).is_ok());
    }

    #[test]
    fn wu_type_relaxes_test_requirement_for_docs_and_process() {
        assert!(WuType::Documentation.relaxes_test_requirement());
        assert!(WuType::Process.relaxes_test_requirement());
        assert!(!WuType::Feature.relaxes_test_requirement());
        assert!(!WuType::Bug.relaxes_test_requirement());
    }
}
