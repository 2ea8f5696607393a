//! YAML & JSONL codecs (spec.md §4.2).
//!
//! `read_wu`/`write_wu` give schema-validated, id-checked access to a WU
//! spec file. The JSONL codec is a generic append-one-line-per-record
//! reader/writer shared by the event log and the memory layer, reporting
//! the 1-based line number on a parse failure (spec.md §8 boundary
//! behavior).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::LumenError;
use crate::model::types::WuId;
use crate::model::wu::Wu;

// ---------------------------------------------------------------------------
// WU YAML codec
// ---------------------------------------------------------------------------

/// Parse a WU spec file, asserting `expected_id` matches the `id` field.
///
/// # Errors
/// Returns [`LumenError::Io`] if the file can't be read,
/// [`LumenError::Parse`] if it isn't valid YAML, or
/// [`LumenError::Preflight`] if the `id` field disagrees with
/// `expected_id`.
pub fn read_wu(path: &Path, expected_id: &WuId) -> Result<Wu, LumenError> {
    let contents = fs::read_to_string(path).map_err(|e| LumenError::Io {
        path: Some(path.to_owned()),
        source: e,
    })?;
    let wu: Wu = serde_yaml::from_str(&contents).map_err(|e| LumenError::Parse {
        path: path.to_owned(),
        line: e.location().map(|l| l.line()),
        detail: e.to_string(),
    })?;
    if &wu.id != expected_id {
        return Err(LumenError::Preflight {
            wu_id: expected_id.clone(),
            detail: format!(
                "file {} declares id {}, but was read as {}",
                path.display(),
                wu.id,
                expected_id
            ),
        });
    }
    Ok(wu)
}

/// Parse a WU spec file without asserting an expected id (used when the
/// id is not yet known, e.g. scanning the WU directory for duplicates).
///
/// # Errors
/// Returns [`LumenError::Io`] or [`LumenError::Parse`] as [`read_wu`].
pub fn read_wu_any(path: &Path) -> Result<Wu, LumenError> {
    let contents = fs::read_to_string(path).map_err(|e| LumenError::Io {
        path: Some(path.to_owned()),
        source: e,
    })?;
    serde_yaml::from_str(&contents).map_err(|e| LumenError::Parse {
        path: path.to_owned(),
        line: e.location().map(|l| l.line()),
        detail: e.to_string(),
    })
}

/// Write a WU spec to `path` with a stable key order (serde struct
/// declaration order — see `Wu`'s field order, matching spec.md §6).
///
/// # Errors
/// Returns [`LumenError::Io`] if the parent directory can't be created or
/// the file can't be written, or a wrapped serialization error.
pub fn write_wu(path: &Path, wu: &Wu) -> Result<(), LumenError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| LumenError::Io {
            path: Some(parent.to_owned()),
            source: e,
        })?;
    }
    let yaml = serde_yaml::to_string(wu).map_err(|e| LumenError::Parse {
        path: path.to_owned(),
        line: None,
        detail: e.to_string(),
    })?;
    fs::write(path, yaml).map_err(|e| LumenError::Io {
        path: Some(path.to_owned()),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// JSONL codec
// ---------------------------------------------------------------------------

/// Append `record` as exactly one JSON line to `path`, creating the file
/// (and its parent directory) if needed.
///
/// Opens in append mode and writes a single `\n`-terminated line; no
/// partial line is ever left on disk (spec.md §4.3: "no partial lines may
/// be emitted").
///
/// # Errors
/// Returns [`LumenError::Io`] on any filesystem failure, or a parse-kind
/// error if serialization fails.
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<(), LumenError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| LumenError::Io {
            path: Some(parent.to_owned()),
            source: e,
        })?;
    }
    let mut line = serde_json::to_string(record).map_err(|e| LumenError::Parse {
        path: path.to_owned(),
        line: None,
        detail: e.to_string(),
    })?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LumenError::Io {
            path: Some(path.to_owned()),
            source: e,
        })?;
    file.write_all(line.as_bytes()).map_err(|e| LumenError::Io {
        path: Some(path.to_owned()),
        source: e,
    })?;
    file.flush().map_err(|e| LumenError::Io {
        path: Some(path.to_owned()),
        source: e,
    })
}

/// Read every record from a JSONL file, tolerating a missing file (empty
/// result) and a trailing partial (unterminated) line (spec.md §4.3).
///
/// # Errors
/// Returns [`LumenError::Io`] for any read failure other than
/// not-found, or [`LumenError::Parse`] with the 1-based line number on
/// the first malformed complete line.
pub fn read_all_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, LumenError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(LumenError::Io {
                path: Some(path.to_owned()),
                source: e,
            })
        }
    };
    let mut records = Vec::new();
    let line_count = contents.lines().count();
    for (idx, line) in contents.lines().enumerate() {
        let is_last = idx + 1 == line_count;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(trimmed) {
            Ok(record) => records.push(record),
            Err(e) => {
                // A trailing, syntactically-incomplete line (e.g. a crash
                // mid-write) is tolerated; anything earlier, or a complete
                // but malformed line, is a hard parse error.
                if is_last && !contents.ends_with('\n') {
                    break;
                }
                return Err(LumenError::Parse {
                    path: path.to_owned(),
                    line: Some(idx + 1),
                    detail: e.to_string(),
                });
            }
        }
    }
    Ok(records)
}
