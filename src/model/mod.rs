//! The WU data model (spec.md §3).
//!
//! [`types`] holds the validated identifier/enum leaves (`WuId`, `Lane`,
//! `WuStatus`, `WuType`, `ClaimMode`). [`wu`] composes them into the `Wu`
//! spec record itself, with claim/completion metadata present exactly when
//! `status` is in the matching set. [`event`] is the append-only event
//! sum type the event log stores.

pub mod event;
pub mod types;
pub mod wu;

pub use event::Event;
pub use types::{ClaimMode, ErrorKind, Lane, MemNodeId, ValidationError, WuId, WuStatus, WuType};
pub use wu::{ClaimMetadata, CompletionMetadata, Tests, Wu};
