//! The append-only WU event log (spec.md §4.3).
//!
//! A thin, single-file wrapper over the generic JSONL codec. All ordering
//! and projection semantics live in [`crate::state_store`]; this module is
//! only responsible for getting [`Event`] records onto and off of disk.

use std::path::{Path, PathBuf};

use crate::codec::{append_jsonl, read_all_jsonl};
use crate::error::LumenError;
use crate::model::event::Event;

/// Handle onto the single-file append-only event log.
#[derive(Clone, Debug)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    /// Open (without reading) the event log at `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The path backing this log.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a single JSON line.
    ///
    /// # Errors
    /// Returns [`LumenError::Io`] on any filesystem failure.
    pub fn append(&self, event: &Event) -> Result<(), LumenError> {
        append_jsonl(&self.path, event)
    }

    /// Load every event in file order. A missing file yields an empty
    /// log (spec.md §8 boundary behavior).
    ///
    /// # Errors
    /// Returns [`LumenError::Parse`] naming the offending line on a
    /// malformed complete line, or [`LumenError::Io`] on other
    /// filesystem failures.
    pub fn load(&self) -> Result<Vec<Event>, LumenError> {
        read_all_jsonl(&self.path)
    }
}
