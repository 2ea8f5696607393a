//! LumenFlow repository configuration (`.lumenflow/config.toml`).
//!
//! Parsed with `serde` + `toml`, `#[serde(deny_unknown_fields)]` and
//! `#[serde(default)]` throughout: a missing file means all defaults, a
//! malformed one fails with a line-numbered [`ConfigError`] — the same
//! contract the teacher's `ManifoldConfig::load` implements.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level LumenFlow repository configuration.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LumenConfig {
    /// Repository-level settings.
    #[serde(default)]
    pub repo: RepoConfig,
    /// Lane WIP-limit settings.
    #[serde(default)]
    pub lanes: LanesConfig,
    /// Overridable on-disk layout (spec.md §4.1, §6).
    #[serde(default)]
    pub layout: LayoutConfig,
    /// Recovery subsystem settings.
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// Coverage-check / merge-adjacent behavior.
    #[serde(default)]
    pub merge: MergeConfig,
}

// ---------------------------------------------------------------------------
// RepoConfig
// ---------------------------------------------------------------------------

/// Repository-level settings.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    /// The main branch name.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// The git remote name.
    #[serde(default = "default_remote")]
    pub remote: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            remote: default_remote(),
        }
    }
}

fn default_branch() -> String {
    "main".to_owned()
}

fn default_remote() -> String {
    "origin".to_owned()
}

// ---------------------------------------------------------------------------
// LanesConfig
// ---------------------------------------------------------------------------

/// Per-lane WIP-limit configuration (spec.md §4.4).
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LanesConfig {
    /// WIP limit applied to any lane without an override.
    #[serde(default = "default_wip_limit")]
    pub default_wip_limit: u32,
    /// Per-lane overrides, keyed by the lane's exact name.
    #[serde(default)]
    pub overrides: BTreeMap<String, u32>,
}

impl Default for LanesConfig {
    fn default() -> Self {
        Self {
            default_wip_limit: default_wip_limit(),
            overrides: BTreeMap::new(),
        }
    }
}

const fn default_wip_limit() -> u32 {
    1
}

impl LanesConfig {
    /// The WIP limit for `lane`: the override if one is set, else the
    /// default.
    #[must_use]
    pub fn wip_limit(&self, lane: &str) -> u32 {
        self.overrides.get(lane).copied().unwrap_or(self.default_wip_limit)
    }
}

// ---------------------------------------------------------------------------
// LayoutConfig
// ---------------------------------------------------------------------------

/// Overridable relative paths for every artifact in spec.md §6's
/// filesystem layout table. Each defaults to the role-appropriate
/// directory/file name so a fresh repo needs no `[layout]` section at all.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    /// Directory holding `<id>.yaml` WU specs.
    #[serde(default = "default_wu_dir")]
    pub wu_dir: String,
    /// Path to the human-readable status dashboard doc.
    #[serde(default = "default_status_doc")]
    pub status_doc: String,
    /// Path to the human-readable backlog dashboard doc.
    #[serde(default = "default_backlog_doc")]
    pub backlog_doc: String,
    /// Directory holding `<id>.done` stamp files.
    #[serde(default = "default_stamps_dir")]
    pub stamps_dir: String,
    /// Directory holding coordinator state: the event log and lane locks.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    /// Directory holding the memory node/relationship logs.
    #[serde(default = "default_memory_dir")]
    pub memory_dir: String,
    /// Directory holding per-WU working worktrees.
    #[serde(default = "default_worktrees_dir")]
    pub worktrees_dir: String,
    /// Directory holding per-WU recovery attempt counters.
    #[serde(default = "default_recovery_dir")]
    pub recovery_dir: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            wu_dir: default_wu_dir(),
            status_doc: default_status_doc(),
            backlog_doc: default_backlog_doc(),
            stamps_dir: default_stamps_dir(),
            state_dir: default_state_dir(),
            memory_dir: default_memory_dir(),
            worktrees_dir: default_worktrees_dir(),
            recovery_dir: default_recovery_dir(),
        }
    }
}

fn default_wu_dir() -> String {
    "wus".to_owned()
}
fn default_status_doc() -> String {
    "STATUS.md".to_owned()
}
fn default_backlog_doc() -> String {
    "BACKLOG.md".to_owned()
}
fn default_stamps_dir() -> String {
    ".lumenflow/stamps".to_owned()
}
fn default_state_dir() -> String {
    ".lumenflow/state".to_owned()
}
fn default_memory_dir() -> String {
    ".lumenflow/memory".to_owned()
}
fn default_worktrees_dir() -> String {
    ".lumenflow/worktrees".to_owned()
}
fn default_recovery_dir() -> String {
    ".lumenflow/recovery".to_owned()
}

// ---------------------------------------------------------------------------
// RecoveryConfig
// ---------------------------------------------------------------------------

/// Recovery subsystem settings (spec.md §4.10).
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecoveryConfig {
    /// Auto-recovery attempts allowed before manual intervention is
    /// required.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Lane lock age, in hours, beyond which it is surfaced as stale.
    #[serde(default = "default_stale_lock_hours")]
    pub stale_lock_hours: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            stale_lock_hours: default_stale_lock_hours(),
        }
    }
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_stale_lock_hours() -> u64 {
    24
}

// ---------------------------------------------------------------------------
// MergeConfig
// ---------------------------------------------------------------------------

/// Coverage-check behavior (spec.md §9 Open Question: "renamed files").
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Whether `done`'s coverage check enables git rename detection.
    /// Off by default per spec.md's resolved Open Question.
    #[serde(default)]
    pub detect_renames: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self { detect_renames: false }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading a LumenFlow configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded, if available.
    pub path: Option<PathBuf>,
    /// Human-readable message, with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl LumenConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields all defaults; this is not an error.
    ///
    /// # Errors
    /// Returns [`ConfigError`] on I/O errors (other than not-found) or
    /// parse errors, with a line number when the TOML parser provides one.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns [`ConfigError`] on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start].chars().filter(|&c| c == '\n').count() + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError { path: None, message }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_section() {
        let cfg = LumenConfig::default();
        assert_eq!(cfg.repo.branch, "main");
        assert_eq!(cfg.repo.remote, "origin");
        assert_eq!(cfg.lanes.default_wip_limit, 1);
        assert_eq!(cfg.layout.wu_dir, "wus");
        assert_eq!(cfg.recovery.max_attempts, 3);
        assert!(!cfg.merge.detect_renames);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = LumenConfig::load(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(cfg, LumenConfig::default());
    }

    #[test]
    fn parses_partial_overrides() {
        let cfg = LumenConfig::parse(
            r#"
            [lanes]
            default_wip_limit = 2

            [lanes.overrides]
            "Backend: Auth" = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.lanes.default_wip_limit, 2);
        assert_eq!(cfg.lanes.wip_limit("Backend: Auth"), 3);
        assert_eq!(cfg.lanes.wip_limit("Core"), 2);
        assert_eq!(cfg.repo.branch, "main");
    }

    #[test]
    fn unknown_field_is_rejected() {
        let result = LumenConfig::parse("[repo]\nbogus = true\n");
        assert!(result.is_err());
    }

    #[test]
    fn parse_error_includes_line_number() {
        let result = LumenConfig::parse("[repo]\nbranch = \n");
        let err = result.unwrap_err();
        assert!(err.message.starts_with("line "));
    }
}
