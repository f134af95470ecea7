//! Counter backend trait for abstracting in-process and external counter stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::descriptor::CounterKey;
use crate::error::Result;

/// Outcome of an atomic compare-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The counter was below the limit and now holds this value
    Admitted(u64),
    /// The counter already reached the limit and was left at this value
    Exhausted(u64),
}

/// Trait for window counter stores.
///
/// Every mutating method is a single atomic read-modify-write. Implementations
/// backed by an external store map `try_acquire` onto a conditional update,
/// e.g. `UPDATE .. SET count = count + 1 WHERE count < $limit RETURNING count`.
/// Errors mean the store could not be reached; the engine fails open on them.
#[async_trait]
pub trait CounterBackend: Send + Sync {
    /// Current count, 0 if the entry is absent or expired at `now`.
    async fn get(&self, key: &CounterKey, now: DateTime<Utc>) -> Result<u64>;

    /// Add one, creating the entry with `expires_at` if absent. Returns the new count.
    async fn increment(&self, key: &CounterKey, expires_at: DateTime<Utc>) -> Result<u64>;

    /// Add one only if the count is below `limit`.
    async fn try_acquire(
        &self,
        key: &CounterKey,
        limit: u64,
        expires_at: DateTime<Utc>,
    ) -> Result<Admission>;

    /// Drop entries whose window ended at or before `now`. Returns how many were dropped.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize>;
}
