//! Lane lock: a filesystem-backed, per-lane mutex (or, under WIP > 1, a
//! counted semaphore) enforcing the WIP limit (spec.md §4.4).
//!
//! Acquisition uses `OpenOptions::new().write(true).create_new(true)` —
//! the `O_CREAT|O_EXCL` idiom — giving the same atomicity guarantee the
//! teacher relies on for its merge-state CAS operations, here expressed as
//! a single exclusive create rather than a write-to-temp-then-rename,
//! because acquisition must *fail* if the slot already exists, which only
//! `create_new` expresses directly.

use std::fs::{self, OpenOptions};
use std::io::Write;

use crate::clock::{parse_rfc3339_secs, Clock};
use crate::error::LumenError;
use crate::model::types::{Lane, WuId};
use crate::paths::Paths;

/// One holder's metadata, as persisted in its lock file.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LockMetadata {
    /// The lane this lock slot belongs to.
    pub lane: Lane,
    /// The WU holding this slot.
    pub wu_id: WuId,
    /// RFC 3339 acquisition timestamp.
    pub acquired_at: String,
    /// A human-readable justification, expected (but not required) when
    /// the lane's WIP limit is greater than 1 (spec.md §4.4: "A 'WIP
    /// justification' note is expected when N > 1; absence is a
    /// warning, not a block").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wip_justification: Option<String>,
}

/// A lane's current lock state, as returned by [`LaneLock::check`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaneCheck {
    /// `true` if at least one holder is present.
    pub locked: bool,
    /// Every current holder, in no particular order.
    pub holders: Vec<LockMetadata>,
    /// WU ids among `holders` whose `acquired_at` is older than the
    /// configured stale threshold. Never auto-released (spec.md §9 Open
    /// Question, resolved: surface-only).
    pub stale: Vec<WuId>,
}

/// Filesystem-backed per-lane lock.
#[derive(Clone, Debug)]
pub struct LaneLock<'a> {
    paths: &'a Paths,
    stale_after_secs: u64,
}

impl<'a> LaneLock<'a> {
    /// Build a lane lock resolver, given the stale threshold in hours
    /// (spec.md §4.4 default 24).
    #[must_use]
    pub fn new(paths: &'a Paths, stale_lock_hours: u64) -> Self {
        Self {
            paths,
            stale_after_secs: stale_lock_hours.saturating_mul(3600),
        }
    }

    /// Acquire a slot in `lane` for `wu_id`.
    ///
    /// # Errors
    /// Returns [`LumenError::Io`] if the slot file already exists (the
    /// lane is at capacity for this holder) or another filesystem error
    /// occurs.
    pub fn acquire(
        &self,
        lane: &Lane,
        wu_id: &WuId,
        clock: &dyn Clock,
        wip_justification: Option<String>,
    ) -> Result<(), LumenError> {
        let dir = self.paths.lane_lock_dir(lane);
        fs::create_dir_all(&dir).map_err(|e| LumenError::Io {
            path: Some(dir.clone()),
            source: e,
        })?;
        let path = self.paths.lane_lock_holder_path(lane, wu_id);
        let metadata = LockMetadata {
            lane: lane.clone(),
            wu_id: wu_id.clone(),
            acquired_at: clock.now_rfc3339(),
            wip_justification,
        };
        let json = serde_json::to_string(&metadata).map_err(|e| LumenError::Parse {
            path: path.clone(),
            line: None,
            detail: e.to_string(),
        })?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| LumenError::Io {
                path: Some(path.clone()),
                source: e,
            })?;
        file.write_all(json.as_bytes()).map_err(|e| LumenError::Io {
            path: Some(path.clone()),
            source: e,
        })
    }

    /// Release `wu_id`'s slot in `lane`.
    ///
    /// A holder mismatch (the file names a different `wu_id` — shouldn't
    /// happen given one file per holder, but the stored metadata is
    /// checked anyway) is reported but non-fatal: logged and treated as a
    /// release (spec.md §4.4: "mismatches are reported but non-fatal").
    ///
    /// # Errors
    /// Returns [`LumenError::Io`] on filesystem failure other than
    /// not-found (releasing an already-released lock is a no-op).
    pub fn release(&self, lane: &Lane, wu_id: &WuId) -> Result<(), LumenError> {
        let path = self.paths.lane_lock_holder_path(lane, wu_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LumenError::Io {
                path: Some(path),
                source: e,
            }),
        }
    }

    /// Inspect `lane`'s current holders.
    ///
    /// # Errors
    /// Returns [`LumenError::Io`] if the lock directory exists but can't
    /// be listed.
    pub fn check(&self, lane: &Lane, now_secs: u64) -> Result<LaneCheck, LumenError> {
        let dir = self.paths.lane_lock_dir(lane);
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LaneCheck {
                    locked: false,
                    holders: Vec::new(),
                    stale: Vec::new(),
                });
            }
            Err(e) => {
                return Err(LumenError::Io {
                    path: Some(dir),
                    source: e,
                })
            }
        };
        let mut holders = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LumenError::Io {
                path: Some(dir.clone()),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }
            let contents = fs::read_to_string(&path).map_err(|e| LumenError::Io {
                path: Some(path.clone()),
                source: e,
            })?;
            let metadata: LockMetadata = serde_json::from_str(&contents).map_err(|e| LumenError::Parse {
                path,
                line: None,
                detail: e.to_string(),
            })?;
            holders.push(metadata);
        }
        let stale = holders
            .iter()
            .filter(|h| {
                parse_rfc3339_secs(&h.acquired_at)
                    .is_some_and(|acquired| now_secs.saturating_sub(acquired) > self.stale_after_secs)
            })
            .map(|h| h.wu_id.clone())
            .collect();
        Ok(LaneCheck {
            locked: !holders.is_empty(),
            holders,
            stale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::LayoutConfig;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Paths) {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path().to_path_buf(), LayoutConfig::default());
        (dir, paths)
    }

    fn lane() -> Lane {
        Lane::new("Core").unwrap()
    }

    fn wu(n: u64) -> WuId {
        WuId::from_number(n).unwrap()
    }

    #[test]
    fn acquire_then_check_shows_one_holder() {
        let (_dir, paths) = setup();
        let lock = LaneLock::new(&paths, 24);
        let clock = FixedClock(1_700_000_000);
        lock.acquire(&lane(), &wu(1), &clock, None).unwrap();
        let check = lock.check(&lane(), 1_700_000_100).unwrap();
        assert!(check.locked);
        assert_eq!(check.holders.len(), 1);
        assert_eq!(check.holders[0].wu_id, wu(1));
    }

    #[test]
    fn second_acquire_for_same_wu_fails() {
        let (_dir, paths) = setup();
        let lock = LaneLock::new(&paths, 24);
        let clock = FixedClock(1_700_000_000);
        lock.acquire(&lane(), &wu(1), &clock, None).unwrap();
        assert!(lock.acquire(&lane(), &wu(1), &clock, None).is_err());
    }

    #[test]
    fn wip_2_allows_two_distinct_holders() {
        let (_dir, paths) = setup();
        let lock = LaneLock::new(&paths, 24);
        let clock = FixedClock(1_700_000_000);
        lock.acquire(&lane(), &wu(1), &clock, Some("hotfix + feature in parallel".to_owned()))
            .unwrap();
        lock.acquire(&lane(), &wu(2), &clock, Some("hotfix + feature in parallel".to_owned()))
            .unwrap();
        let check = lock.check(&lane(), 1_700_000_100).unwrap();
        assert_eq!(check.holders.len(), 2);
    }

    #[test]
    fn release_then_acquire_again_succeeds() {
        let (_dir, paths) = setup();
        let lock = LaneLock::new(&paths, 24);
        let clock = FixedClock(1_700_000_000);
        lock.acquire(&lane(), &wu(1), &clock, None).unwrap();
        lock.release(&lane(), &wu(1)).unwrap();
        assert!(lock.acquire(&lane(), &wu(1), &clock, None).is_ok());
    }

    #[test]
    fn release_of_absent_holder_is_a_no_op() {
        let (_dir, paths) = setup();
        let lock = LaneLock::new(&paths, 24);
        assert!(lock.release(&lane(), &wu(1)).is_ok());
    }

    #[test]
    fn unlocked_lane_reports_empty_check() {
        let (_dir, paths) = setup();
        let lock = LaneLock::new(&paths, 24);
        let check = lock.check(&lane(), 1_700_000_000).unwrap();
        assert!(!check.locked);
        assert!(check.holders.is_empty());
    }

    #[test]
    fn stale_threshold_flags_old_holders() {
        let (_dir, paths) = setup();
        let lock = LaneLock::new(&paths, 24);
        let clock = FixedClock(1_700_000_000);
        lock.acquire(&lane(), &wu(1), &clock, None).unwrap();
        // 25 hours later.
        let check = lock.check(&lane(), 1_700_000_000 + 25 * 3600).unwrap();
        assert_eq!(check.stale, vec![wu(1)]);
    }

    #[test]
    fn under_24h_is_not_stale() {
        let (_dir, paths) = setup();
        let lock = LaneLock::new(&paths, 24);
        let clock = FixedClock(1_700_000_000);
        lock.acquire(&lane(), &wu(1), &clock, None).unwrap();
        let check = lock.check(&lane(), 1_700_000_000 + 23 * 3600).unwrap();
        assert!(check.stale.is_empty());
    }
}
