//! Retest scheduling rules.
//!
//! Buckets are keyed by Unix timestamps (seconds). A subject filed under
//! bucket `B` is *already tested* while `now < B + interval` and *due for
//! retest* once `now > B + interval`. At exactly `now == B + interval` it is
//! in neither set.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Seconds in one day; a bucket older than this is closed for new entries.
pub const ONE_DAY_SECS: i64 = 24 * 3600;

/// Extra age given to converted pending entries so they are due at the first
/// retest window.
const PENDING_SLACK_SECS: i64 = 100;

/// Source of the current Unix time in seconds.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually driven clock. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now)),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Retest interval and the bucket rules derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetestSchedule {
    interval_secs: i64,
}

impl RetestSchedule {
    pub fn new(interval_secs: i64) -> Self {
        Self {
            interval_secs: interval_secs.max(0),
        }
    }

    pub fn from_days(days: u64) -> Self {
        let days = i64::try_from(days).unwrap_or(i64::MAX);
        Self::new(days.saturating_mul(ONE_DAY_SECS))
    }

    pub fn interval_secs(&self) -> i64 {
        self.interval_secs
    }

    /// Bucket under which a subject classified at `now` is filed.
    ///
    /// Reuses the most recent bucket while it is younger than both one day
    /// and the retest interval; otherwise opens a bucket at `now`.
    pub fn bucket_for_new_entry<I>(&self, existing: I, now: i64) -> i64
    where
        I: IntoIterator<Item = i64>,
    {
        let Some(recent) = existing.into_iter().max() else {
            return now;
        };

        if now > recent.saturating_add(ONE_DAY_SECS) {
            return now;
        }

        if now < recent.saturating_add(self.interval_secs) {
            return recent;
        }

        now
    }

    pub fn is_due(&self, bucket: i64, now: i64) -> bool {
        now > bucket.saturating_add(self.interval_secs)
    }

    pub fn is_recent(&self, bucket: i64, now: i64) -> bool {
        now < bucket.saturating_add(self.interval_secs)
    }
}

/// Bucket that pending (`to_test`) entries are moved into during load.
pub fn pending_bucket(now: i64) -> i64 {
    now - ONE_DAY_SECS - PENDING_SLACK_SECS
}
