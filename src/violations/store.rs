//! Append-only violation storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::record::{ViolationQuery, ViolationRecord};
use crate::error::Result;
use crate::policy::PolicyId;

/// Capacity of the live violation feed.
const FEED_CAPACITY: usize = 1024;

/// Write-once storage for violations plus the read side used by dashboards.
#[async_trait]
pub trait ViolationStore: Send + Sync {
    /// Append a record. Called once per denial.
    async fn append(&self, record: ViolationRecord) -> Result<()>;

    /// Records matching `query`, oldest first.
    async fn query(&self, query: &ViolationQuery) -> Result<Vec<ViolationRecord>>;

    /// Number of violations in `[since, until)`, for one policy or for all.
    async fn count(
        &self,
        policy_id: Option<PolicyId>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64>;
}

/// In-process violation log with bounded retention and a live feed.
pub struct InMemoryViolationStore {
    records: RwLock<VecDeque<ViolationRecord>>,
    max_records: usize,
    feed: broadcast::Sender<ViolationRecord>,
}

impl InMemoryViolationStore {
    pub fn new(max_records: usize) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            records: RwLock::new(VecDeque::new()),
            max_records: max_records.max(1),
            feed,
        }
    }

    /// Live stream of violations appended after subscribing.
    ///
    /// A slow consumer sees a `Lagged` error item instead of blocking writers.
    pub fn subscribe(&self) -> BroadcastStream<ViolationRecord> {
        BroadcastStream::new(self.feed.subscribe())
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl ViolationStore for InMemoryViolationStore {
    async fn append(&self, record: ViolationRecord) -> Result<()> {
        {
            let mut records = self.records.write();
            if records.len() >= self.max_records {
                records.pop_front();
            }
            records.push_back(record.clone());
        }
        // No subscribers is fine
        let _ = self.feed.send(record);
        Ok(())
    }

    async fn query(&self, query: &ViolationQuery) -> Result<Vec<ViolationRecord>> {
        let records = self.records.read();
        let mut matched: Vec<ViolationRecord> =
            records.iter().filter(|r| query.matches(r)).cloned().collect();
        if let Some(limit) = query.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        Ok(matched)
    }

    async fn count(
        &self,
        policy_id: Option<PolicyId>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64> {
        let records = self.records.read();
        Ok(records
            .iter()
            .filter(|r| policy_id.map_or(true, |id| r.policy_id == id))
            .filter(|r| r.timestamp >= since && r.timestamp < until)
            .count() as u64)
    }
}
