//! Background cleanup of expired rate limit state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::backend::CounterBackend;
use super::burst::BurstLimiter;
use crate::scheduler::PeriodicJob;

/// Drops expired window counters and fully refilled burst buckets.
pub struct CounterSweeper {
    counters: Arc<dyn CounterBackend>,
    bursts: Arc<BurstLimiter>,
}

impl CounterSweeper {
    pub fn new(counters: Arc<dyn CounterBackend>, bursts: Arc<BurstLimiter>) -> Self {
        Self { counters, bursts }
    }
}

#[async_trait]
impl PeriodicJob for CounterSweeper {
    fn name(&self) -> &str {
        "counter-sweeper"
    }

    async fn run(&self, now: DateTime<Utc>) {
        let counters = match self.counters.sweep(now).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Counter sweep failed");
                0
            }
        };
        let buckets = self.bursts.sweep(now);
        if counters > 0 || buckets > 0 {
            debug!(counters, buckets, "Swept expired rate limit state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{BurstConfig, PolicyId};
    use crate::ratelimit::{CounterKey, InMemoryCounterStore};
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn test_sweeps_counters_and_buckets() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let counters = Arc::new(InMemoryCounterStore::new());
        let bursts = Arc::new(BurstLimiter::new());

        let key = CounterKey::new(PolicyId(1), "ip:10.0.0.1", t0);
        counters.increment(&key, t0 + Duration::minutes(1)).await.unwrap();
        let config = BurstConfig {
            max_tokens: 2,
            refill_window_secs: 10,
        };
        bursts.try_consume(PolicyId(1), "ip:10.0.0.1", &config, t0);

        let sweeper = CounterSweeper::new(counters.clone(), bursts.clone());
        sweeper.run(t0 + Duration::seconds(30)).await;
        assert_eq!(counters.len(), 1);
        assert!(bursts.is_empty());

        sweeper.run(t0 + Duration::minutes(2)).await;
        assert!(counters.is_empty());
    }
}
