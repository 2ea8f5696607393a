//! The WU event sum type (spec.md §3 "Event", §4.3).
//!
//! One variant per event `kind`. Modeled as a tagged enum rather than a
//! loose `{kind, wu_id, lane?, ...}` map (spec.md §9 design note: "Dynamic
//! config/records ... `Event` as a sum with one variant per kind"), while
//! still matching the wire shape spec.md §6 describes: one JSON object per
//! line with `kind`/`wu_id`/`ts` always present and the rest optional.

use serde::{Deserialize, Serialize};

use super::types::{Lane, WuId};

/// An append-only WU event (spec.md §3, §6 "Event log format").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// A WU was claimed into a lane.
    Claim {
        /// The claimed WU.
        wu_id: WuId,
        /// The lane it was claimed into.
        lane: Lane,
        /// The WU's title at claim time, for backlog/status rendering
        /// without re-reading the spec file.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        /// The claiming agent session.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// Set when the claim bypassed a lane-busy or overlap refusal
        /// (`force`/`force_overlap`), recording why.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        /// RFC 3339 timestamp.
        ts: String,
    },
    /// A WU was released back to `ready` without completing (recovery
    /// `reset`/`nuke`, or an explicit release).
    Release {
        /// The released WU.
        wu_id: WuId,
        /// The lane it was released from, if known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lane: Option<Lane>,
        /// RFC 3339 timestamp.
        ts: String,
    },
    /// A durable handoff point was recorded (spec.md §4.9 `checkpoint`).
    Checkpoint {
        /// The WU this checkpoint is linked to.
        wu_id: WuId,
        /// Free-text note.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
        /// What's been done so far.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<String>,
        /// What to do next.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_steps: Option<String>,
        /// A `git diff --stat`-style summary at checkpoint time, surfaced
        /// verbatim by `recover_context` (spec.md §4.9 `recover`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        git_diff_stat: Option<String>,
        /// RFC 3339 timestamp.
        ts: String,
    },
    /// A WU was completed.
    Done {
        /// The completed WU.
        wu_id: WuId,
        /// RFC 3339 timestamp.
        ts: String,
    },
    /// A WU was blocked on something external.
    Block {
        /// The blocked WU.
        wu_id: WuId,
        /// Why it's blocked.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        /// RFC 3339 timestamp.
        ts: String,
    },
}

impl Event {
    /// The WU this event pertains to.
    #[must_use]
    pub const fn wu_id(&self) -> &WuId {
        match self {
            Self::Claim { wu_id, .. }
            | Self::Release { wu_id, .. }
            | Self::Checkpoint { wu_id, .. }
            | Self::Done { wu_id, .. }
            | Self::Block { wu_id, .. } => wu_id,
        }
    }

    /// RFC 3339 timestamp this event was recorded at.
    #[must_use]
    pub fn ts(&self) -> &str {
        match self {
            Self::Claim { ts, .. }
            | Self::Release { ts, .. }
            | Self::Checkpoint { ts, .. }
            | Self::Done { ts, .. }
            | Self::Block { ts, .. } => ts,
        }
    }

    /// The event kind, as the lowercase word spec.md uses throughout
    /// (`"claim"`, `"release"`, `"checkpoint"`, `"done"`, `"block"`).
    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Self::Claim { .. } => "claim",
            Self::Release { .. } => "release",
            Self::Checkpoint { .. } => "checkpoint",
            Self::Done { .. } => "done",
            Self::Block { .. } => "block",
        }
    }

    /// `true` for [`Event::Checkpoint`] — checkpoints are annotations and
    /// never change a WU's effective status (spec.md §4.3 table).
    #[must_use]
    pub const fn is_checkpoint(&self) -> bool {
        matches!(self, Self::Checkpoint { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wu(n: u64) -> WuId {
        WuId::from_number(n).unwrap()
    }

    #[test]
    fn claim_round_trips_through_json() {
        let e = Event::Claim {
            wu_id: wu(1),
            lane: Lane::new("Core").unwrap(),
            title: Some("Do the thing".to_owned()),
            session_id: Some("s1".to_owned()),
            reason: None,
            ts: "2026-01-01T00:00:00Z".to_owned(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"kind\":\"claim\""));
        assert!(!json.contains("\"reason\""));
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, e);
    }

    #[test]
    fn block_with_reason_round_trips() {
        let e = Event::Block {
            wu_id: wu(2),
            reason: Some("waiting on design review".to_owned()),
            ts: "2026-01-01T00:00:00Z".to_owned(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, e);
    }

    #[test]
    fn checkpoint_is_flagged_as_annotation() {
        let e = Event::Checkpoint {
            wu_id: wu(1),
            note: None,
            progress: Some("tests green".to_owned()),
            next_steps: Some("refactor handler".to_owned()),
            git_diff_stat: Some("src/a.rs | 12 +".to_owned()),
            ts: "2026-01-01T00:00:00Z".to_owned(),
        };
        assert!(e.is_checkpoint());
        assert_eq!(e.kind_str(), "checkpoint");
    }

    #[test]
    fn wu_id_and_ts_accessors_cover_every_variant() {
        let events = vec![
            Event::Claim {
                wu_id: wu(1),
                lane: Lane::new("Core").unwrap(),
                title: None,
                session_id: None,
                reason: None,
                ts: "t".to_owned(),
            },
            Event::Release {
                wu_id: wu(1),
                lane: None,
                ts: "t".to_owned(),
            },
            Event::Done {
                wu_id: wu(1),
                ts: "t".to_owned(),
            },
        ];
        for e in events {
            assert_eq!(e.wu_id(), &wu(1));
            assert_eq!(e.ts(), "t");
        }
    }
}
