//! Per-policy traffic tallies fed by the decision engine.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::policy::PolicyId;

#[derive(Debug, Default)]
struct Tally {
    observed: AtomicU64,
    blocked: AtomicU64,
}

/// Observed/blocked totals for one policy in one reporting bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficTotals {
    pub observed: u64,
    pub blocked: u64,
}

/// Request tallies per (policy, bucket start).
///
/// Writes are a single atomic add on the request path; the aggregator drains
/// closed buckets on its own schedule.
#[derive(Debug)]
pub struct TrafficLedger {
    bucket_secs: i64,
    tallies: DashMap<(PolicyId, i64), Tally>,
}

impl TrafficLedger {
    pub fn new(bucket_secs: u64) -> Self {
        Self {
            bucket_secs: bucket_secs.max(1) as i64,
            tallies: DashMap::new(),
        }
    }

    pub fn bucket_secs(&self) -> u64 {
        self.bucket_secs as u64
    }

    /// Start of the reporting bucket containing `now`, epoch seconds.
    pub fn bucket_start(&self, now: DateTime<Utc>) -> i64 {
        let secs = now.timestamp();
        secs - secs.rem_euclid(self.bucket_secs)
    }

    /// Count one evaluation of `policy`, blocked or not.
    pub fn observe(&self, policy: PolicyId, now: DateTime<Utc>, blocked: bool) {
        let key = (policy, self.bucket_start(now));
        let tally = self.tallies.entry(key).or_default();
        tally.observed.fetch_add(1, Ordering::Relaxed);
        if blocked {
            tally.blocked.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Totals of a bucket without removing them.
    pub fn peek(&self, policy: PolicyId, bucket_start: i64) -> TrafficTotals {
        self.tallies
            .get(&(policy, bucket_start))
            .map(|t| TrafficTotals {
                observed: t.observed.load(Ordering::Relaxed),
                blocked: t.blocked.load(Ordering::Relaxed),
            })
            .unwrap_or_default()
    }

    /// Remove and return the totals of a closed bucket.
    pub fn take(&self, policy: PolicyId, bucket_start: i64) -> TrafficTotals {
        self.tallies
            .remove(&(policy, bucket_start))
            .map(|(_, t)| TrafficTotals {
                observed: t.observed.into_inner(),
                blocked: t.blocked.into_inner(),
            })
            .unwrap_or_default()
    }

    /// Drop tallies of buckets that started before `bucket_start`.
    pub fn prune_before(&self, bucket_start: i64) -> usize {
        let before = self.tallies.len();
        self.tallies.retain(|(_, start), _| *start >= bucket_start);
        before.saturating_sub(self.tallies.len())
    }
}
