//! `lumenflow` library crate — the Work Unit lifecycle coordinator.
//!
//! The primary interface is the `lumen` CLI binary (in the
//! `lumenflow-cli` crate). This crate holds the domain logic: the WU data
//! model, codecs, event log, state store, lane lock, overlap detector,
//! validator, micro-worktree transactor, lifecycle engine, memory layer,
//! and recovery subsystem.

pub mod clock;
pub mod codec;
pub mod config;
pub mod docs;
pub mod engine;
pub mod error;
pub mod event_log;
pub mod lane_lock;
pub mod memory;
pub mod micro_worktree;
pub mod model;
pub mod overlap;
pub mod paths;
pub mod recovery;
pub mod state_store;
pub mod validator;
