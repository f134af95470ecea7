//! In-process window counter store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use super::backend::{Admission, CounterBackend};
use super::descriptor::CounterKey;
use crate::error::Result;

/// A counter for one (policy, identifier, window) triple.
///
/// The window is part of the key, so an entry is never reset in place: the
/// next window simply uses a new entry and the old one expires.
#[derive(Debug)]
pub struct CounterEntry {
    /// Current count of requests in this window
    count: AtomicU64,
    /// Window end, epoch seconds
    expires_at: i64,
}

impl CounterEntry {
    fn new(expires_at: DateTime<Utc>) -> Self {
        Self {
            count: AtomicU64::new(0),
            expires_at: expires_at.timestamp(),
        }
    }

    /// Count as observed at `now`; an expired entry reads as 0.
    pub fn count_at(&self, now: DateTime<Utc>) -> u64 {
        if self.is_expired(now) {
            0
        } else {
            self.count.load(Ordering::SeqCst)
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now.timestamp()
    }
}

/// Window counters held in a sharded concurrent map.
///
/// Updates on existing entries are lock-free atomics under the shard's read
/// lock; creation goes through the shard's entry lock, so two racing first
/// requests still land on the same entry.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    entries: DashMap<CounterKey, CounterEntry>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all counters.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn with_entry<R>(
        &self,
        key: &CounterKey,
        expires_at: DateTime<Utc>,
        f: impl FnOnce(&CounterEntry) -> R,
    ) -> R {
        if let Some(entry) = self.entries.get(key) {
            return f(&entry);
        }
        let entry = self.entries.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, expires_at = %expires_at, "Creating new window counter");
            CounterEntry::new(expires_at)
        });
        f(&entry)
    }
}

#[async_trait]
impl CounterBackend for InMemoryCounterStore {
    async fn get(&self, key: &CounterKey, now: DateTime<Utc>) -> Result<u64> {
        Ok(self.entries.get(key).map(|e| e.count_at(now)).unwrap_or(0))
    }

    async fn increment(&self, key: &CounterKey, expires_at: DateTime<Utc>) -> Result<u64> {
        let count = self.with_entry(key, expires_at, |entry| {
            entry.count.fetch_add(1, Ordering::SeqCst) + 1
        });
        trace!(key = %key, count, "Incremented window counter");
        Ok(count)
    }

    async fn try_acquire(
        &self,
        key: &CounterKey,
        limit: u64,
        expires_at: DateTime<Utc>,
    ) -> Result<Admission> {
        let admission = self.with_entry(key, expires_at, |entry| {
            match entry
                .count
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    (current < limit).then_some(current + 1)
                }) {
                Ok(previous) => Admission::Admitted(previous + 1),
                Err(current) => Admission::Exhausted(current),
            }
        });
        trace!(key = %key, limit, ?admission, "Window counter acquire");
        Ok(admission)
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before.saturating_sub(self.entries.len()))
    }
}
