//! Periodic rollup of traffic and violations into reporting buckets.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::ledger::TrafficLedger;
use crate::error::Result;
use crate::policy::{PolicyId, PolicyStore};
use crate::scheduler::PeriodicJob;
use crate::violations::{ViolationQuery, ViolationStore};

/// Aggregated traffic of one policy over one reporting bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsBucket {
    pub policy_id: PolicyId,
    pub policy_name: String,
    pub bucket_start: DateTime<Utc>,
    pub duration_secs: u64,
    pub total_observed: u64,
    pub total_blocked: u64,
    /// Blocked over observed, 0 when there was no traffic
    pub violation_rate: f64,
    pub top_identifiers: Vec<(String, u64)>,
    pub top_endpoints: Vec<(String, u64)>,
}

/// Destination of aggregated buckets.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn store(&self, bucket: MetricsBucket) -> Result<()>;
}

/// Keeps every bucket in memory, grouped by policy.
#[derive(Debug, Default)]
pub struct InMemoryMetricsStore {
    buckets: RwLock<HashMap<PolicyId, Vec<MetricsBucket>>>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buckets for a policy, oldest first.
    pub fn series(&self, policy_id: PolicyId) -> Vec<MetricsBucket> {
        self.buckets.read().get(&policy_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsStore {
    async fn store(&self, bucket: MetricsBucket) -> Result<()> {
        self.buckets
            .write()
            .entry(bucket.policy_id)
            .or_default()
            .push(bucket);
        Ok(())
    }
}

/// Progress of the aggregator through the bucket series.
#[derive(Debug, Default)]
struct Progress {
    /// Start of the last bucket fully aggregated, epoch seconds
    last_bucket: Option<i64>,
    /// Policies already written for the bucket after `last_bucket`
    stored: HashSet<PolicyId>,
}

/// Rolls closed buckets up into a [`MetricsBucket`] per active policy. Runs
/// off the request path.
pub struct MetricsAggregator {
    policies: Arc<PolicyStore>,
    ledger: Arc<TrafficLedger>,
    violations: Arc<dyn ViolationStore>,
    sink: Arc<dyn MetricsSink>,
    top_n: usize,
    progress: Mutex<Progress>,
}

impl MetricsAggregator {
    pub fn new(
        policies: Arc<PolicyStore>,
        ledger: Arc<TrafficLedger>,
        violations: Arc<dyn ViolationStore>,
        sink: Arc<dyn MetricsSink>,
        top_n: usize,
    ) -> Self {
        Self {
            policies,
            ledger,
            violations,
            sink,
            top_n,
            progress: Mutex::new(Progress::default()),
        }
    }

    /// Aggregate every bucket that closed since the previous run.
    ///
    /// The first run starts with the bucket that closed most recently before
    /// `now`. Later runs continue from the last aggregated bucket, so the
    /// series has no gaps even when a run is late. A bucket counts as done
    /// only once every policy's entry reached the sink; after a failure the
    /// next run resumes with the policies that are still missing.
    pub async fn aggregate(&self, now: DateTime<Utc>) -> Result<Vec<MetricsBucket>> {
        let mut progress = self.progress.lock().await;
        let duration = self.ledger.bucket_secs() as i64;
        let last_closed = self.ledger.bucket_start(now) - duration;
        let mut start = progress.last_bucket.map_or(last_closed, |last| last + duration);
        if start > last_closed {
            debug!(bucket_start = last_closed, "Bucket already aggregated");
            return Ok(Vec::new());
        }

        let mut produced = Vec::new();
        while start <= last_closed {
            self.aggregate_bucket(start, duration, &mut progress, &mut produced)
                .await?;
            progress.last_bucket = Some(start);
            progress.stored.clear();

            // Tallies of this bucket and of removed policies
            let pruned = self.ledger.prune_before(start + duration);
            info!(bucket_start = %epoch(start), pruned, "Metrics bucket aggregated");
            start += duration;
        }
        Ok(produced)
    }

    async fn aggregate_bucket(
        &self,
        start: i64,
        duration: i64,
        progress: &mut Progress,
        produced: &mut Vec<MetricsBucket>,
    ) -> Result<()> {
        let bucket_start = epoch(start);
        let bucket_end = epoch(start + duration);

        for stored in self.policies.snapshot().iter().filter(|p| p.policy.active) {
            let policy = &stored.policy;
            if progress.stored.contains(&policy.id) {
                continue;
            }
            let totals = self.ledger.peek(policy.id, start);
            let violations = self
                .violations
                .query(&ViolationQuery::for_policy(policy.id).between(bucket_start, bucket_end))
                .await?;

            let identifiers = top_n(violations.iter().map(|v| v.identifier.as_str()), self.top_n);
            let endpoints = top_n(violations.iter().map(|v| v.endpoint.as_str()), self.top_n);
            let violation_rate = if totals.observed == 0 {
                0.0
            } else {
                totals.blocked as f64 / totals.observed as f64
            };

            let bucket = MetricsBucket {
                policy_id: policy.id,
                policy_name: policy.name.clone(),
                bucket_start,
                duration_secs: duration as u64,
                total_observed: totals.observed,
                total_blocked: totals.blocked,
                violation_rate,
                top_identifiers: identifiers,
                top_endpoints: endpoints,
            };
            self.sink.store(bucket.clone()).await?;
            progress.stored.insert(policy.id);
            produced.push(bucket);
        }
        Ok(())
    }
}

#[async_trait]
impl PeriodicJob for MetricsAggregator {
    fn name(&self) -> &str {
        "metrics-aggregator"
    }

    async fn run(&self, now: DateTime<Utc>) {
        if let Err(e) = self.aggregate(now).await {
            warn!(error = %e, "Metrics aggregation failed");
        }
    }
}

fn epoch(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .expect("bucket boundary lies inside the representable range")
}

/// Most frequent values, highest count first, ties by value.
fn top_n<'a>(values: impl Iterator<Item = &'a str>, n: usize) -> Vec<(String, u64)> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    let mut ranked: Vec<(String, u64)> = counts
        .into_iter()
        .map(|(value, count)| (value.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(n);
    ranked
}
