//! Token bucket burst allowance.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tracing::trace;

use crate::policy::{BurstConfig, PolicyId};

/// Result of a burst check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BurstOutcome {
    /// A token was consumed
    Allowed {
        /// Tokens left after consuming
        remaining: f64,
    },
    /// The bucket is empty
    Denied {
        /// Time until a whole token is available again
        retry_after: Duration,
    },
}

impl BurstOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, BurstOutcome::Allowed { .. })
    }
}

/// Token bucket for one (policy, identifier).
#[derive(Debug, Clone)]
struct TokenBucket {
    /// Available tokens
    tokens: f64,
    /// Maximum tokens (bucket capacity)
    max_tokens: f64,
    /// Token refill rate per second
    refill_rate: f64,
    /// Last time tokens were refilled
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    /// A fresh bucket starts full.
    fn new(config: &BurstConfig, now: DateTime<Utc>) -> Self {
        let max_tokens = config.max_tokens as f64;
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate: config.refill_rate(),
            last_refill: now,
        }
    }

    /// Refill tokens based on elapsed time.
    ///
    /// A clock step backwards adds nothing and does not move `last_refill`.
    fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.last_refill).num_microseconds().unwrap_or(i64::MAX);
        if elapsed <= 0 {
            return;
        }
        let elapsed = elapsed as f64 / 1_000_000.0;
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    fn try_consume(&mut self, now: DateTime<Utc>) -> BurstOutcome {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            BurstOutcome::Allowed {
                remaining: self.tokens,
            }
        } else {
            let needed = 1.0 - self.tokens;
            BurstOutcome::Denied {
                retry_after: Duration::from_secs_f64(needed / self.refill_rate),
            }
        }
    }

    /// A bucket that would be full at `now` carries no state worth keeping.
    fn is_idle(&self, now: DateTime<Utc>) -> bool {
        let mut probe = self.clone();
        probe.refill(now);
        probe.tokens >= probe.max_tokens
    }
}

/// Token buckets keyed by (policy, identifier).
///
/// Refill and consume happen under the map's entry lock, so concurrent
/// requests for the same identifier never both spend the last token.
#[derive(Debug, Default)]
pub struct BurstLimiter {
    buckets: DashMap<(PolicyId, String), TokenBucket>,
}

impl BurstLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refill, then try to take one token.
    pub fn try_consume(
        &self,
        policy: PolicyId,
        identifier: &str,
        config: &BurstConfig,
        now: DateTime<Utc>,
    ) -> BurstOutcome {
        let mut bucket = self
            .buckets
            .entry((policy, identifier.to_string()))
            .or_insert_with(|| TokenBucket::new(config, now));

        // Policy edits take effect without waiting for the bucket to expire
        let max_tokens = config.max_tokens as f64;
        if bucket.max_tokens != max_tokens || bucket.refill_rate != config.refill_rate() {
            bucket.refill(now);
            bucket.max_tokens = max_tokens;
            bucket.refill_rate = config.refill_rate();
            bucket.tokens = bucket.tokens.min(max_tokens);
        }

        let outcome = bucket.try_consume(now);
        trace!(policy = %policy, identifier, ?outcome, "Burst check");
        outcome
    }

    /// Tokens currently available, after refill, without consuming.
    pub fn available(&self, policy: PolicyId, identifier: &str, now: DateTime<Utc>) -> Option<f64> {
        self.buckets
            .get(&(policy, identifier.to_string()))
            .map(|bucket| {
                let mut probe = bucket.clone();
                probe.refill(now);
                probe.tokens
            })
    }

    /// Drop buckets that have refilled completely. Returns how many were dropped.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_idle(now));
        before.saturating_sub(self.buckets.len())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(max_tokens: u32, refill_window_secs: u64) -> BurstConfig {
        BurstConfig {
            max_tokens,
            refill_window_secs,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_fresh_bucket_allows_exactly_max() {
        let limiter = BurstLimiter::new();
        let cfg = config(3, 60);

        for _ in 0..3 {
            assert!(limiter.try_consume(PolicyId(1), "a", &cfg, t0()).is_allowed());
        }
        let outcome = limiter.try_consume(PolicyId(1), "a", &cfg, t0());
        assert!(!outcome.is_allowed());
        if let BurstOutcome::Denied { retry_after } = outcome {
            assert!((retry_after.as_secs_f64() - 20.0).abs() < 1e-6);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_consume_spends_each_token_once() {
        let limiter = std::sync::Arc::new(BurstLimiter::new());
        let cfg = config(5, 60);

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.try_consume(PolicyId(1), "ip:10.0.0.1", &cfg, t0()).is_allowed()
                })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 5);
        let tokens = limiter.available(PolicyId(1), "ip:10.0.0.1", t0()).unwrap();
        assert!(tokens.abs() < 1e-9);
    }

    #[test]
    fn test_linear_refill() {
        let limiter = BurstLimiter::new();
        let cfg = config(3, 60);
        for _ in 0..3 {
            limiter.try_consume(PolicyId(1), "a", &cfg, t0());
        }

        // One token every 20 seconds
        let later = t0() + chrono::Duration::seconds(21);
        assert!(limiter.try_consume(PolicyId(1), "a", &cfg, later).is_allowed());
        assert!(!limiter.try_consume(PolicyId(1), "a", &cfg, later).is_allowed());
    }

    #[test]
    fn test_tokens_never_exceed_max() {
        let limiter = BurstLimiter::new();
        let cfg = config(3, 60);
        limiter.try_consume(PolicyId(1), "a", &cfg, t0());

        let much_later = t0() + chrono::Duration::days(30);
        let available = limiter.available(PolicyId(1), "a", much_later).unwrap();
        assert!(available <= 3.0);
        assert!((available - 3.0).abs() < 1e-9);

        match limiter.try_consume(PolicyId(1), "a", &cfg, much_later) {
            BurstOutcome::Allowed { remaining } => assert!((remaining - 2.0).abs() < 1e-9),
            other => panic!("expected allowed, got {:?}", other),
        }
    }

    #[test]
    fn test_clock_going_backwards_adds_nothing() {
        let limiter = BurstLimiter::new();
        let cfg = config(1, 60);
        assert!(limiter.try_consume(PolicyId(1), "a", &cfg, t0()).is_allowed());

        let earlier = t0() - chrono::Duration::seconds(30);
        assert!(!limiter.try_consume(PolicyId(1), "a", &cfg, earlier).is_allowed());
        let tokens = limiter.available(PolicyId(1), "a", t0()).unwrap();
        assert!(tokens >= 0.0);
    }

    #[test]
    fn test_identifiers_are_independent() {
        let limiter = BurstLimiter::new();
        let cfg = config(1, 60);
        assert!(limiter.try_consume(PolicyId(1), "a", &cfg, t0()).is_allowed());
        assert!(limiter.try_consume(PolicyId(1), "b", &cfg, t0()).is_allowed());
        assert!(limiter.try_consume(PolicyId(2), "a", &cfg, t0()).is_allowed());
        assert_eq!(limiter.len(), 3);
    }

    #[test]
    fn test_shrinking_capacity_clamps_tokens() {
        let limiter = BurstLimiter::new();
        limiter.try_consume(PolicyId(1), "a", &config(10, 60), t0());

        let smaller = config(2, 60);
        assert!(limiter.try_consume(PolicyId(1), "a", &smaller, t0()).is_allowed());
        assert!(limiter.try_consume(PolicyId(1), "a", &smaller, t0()).is_allowed());
        assert!(!limiter.try_consume(PolicyId(1), "a", &smaller, t0()).is_allowed());
    }

    #[test]
    fn test_sweep_drops_refilled_buckets() {
        let limiter = BurstLimiter::new();
        let cfg = config(2, 60);
        limiter.try_consume(PolicyId(1), "a", &cfg, t0());
        limiter.try_consume(PolicyId(1), "b", &cfg, t0());
        limiter.try_consume(PolicyId(1), "b", &cfg, t0());

        // "a" is back to full after 30s, "b" still has one token missing
        let later = t0() + chrono::Duration::seconds(30);
        assert_eq!(limiter.sweep(later), 1);
        assert!(limiter.available(PolicyId(1), "a", later).is_none());
        assert!(limiter.available(PolicyId(1), "b", later).is_some());
    }
}
