//! Core admission engine.
//!
//! For every request the engine walks the resolved policies in priority order
//! and runs each through the burst gate and then the window gate. The first
//! policy that denies ends the walk: lower-priority policies are neither
//! evaluated nor incremented, and the violation is recorded before the
//! verdict is returned.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::backend::{Admission, CounterBackend};
use super::burst::{BurstLimiter, BurstOutcome};
use super::decision::{BurstInfo, Decision, DenyReason};
use super::descriptor::{CounterKey, RequestDescriptor};
use crate::error::{GatekeeperError, Result};
use crate::metrics::TrafficLedger;
use crate::policy::{PolicyId, PolicyResolver, PolicyStore, ResolvedPolicy};
use crate::violations::{ViolationAction, ViolationRecord, ViolationRecorder};

/// Default bound on a single counter backend call.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_millis(50);

/// The single call a request-handling layer makes.
#[async_trait]
pub trait AdmissionControl: Send + Sync {
    async fn check(&self, request: &RequestDescriptor) -> Decision;
}

/// Decision counters, including requests admitted in degraded mode.
#[derive(Debug, Default)]
pub struct EngineStats {
    allowed: AtomicU64,
    denied: AtomicU64,
    degraded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStatsSnapshot {
    pub allowed: u64,
    pub denied: u64,
    /// Policy evaluations skipped because the counter backend failed
    pub degraded: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }
}

/// A policy that rejected the request.
struct Denial<'a> {
    candidate: &'a ResolvedPolicy,
    reason: DenyReason,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    /// Window count before this request
    count: u64,
    retry_after_secs: u64,
    burst: Option<BurstInfo>,
}

/// Orchestrates resolution, burst and window gates, and violation recording.
pub struct DecisionEngine {
    resolver: PolicyResolver,
    counters: Arc<dyn CounterBackend>,
    bursts: Arc<BurstLimiter>,
    recorder: ViolationRecorder,
    ledger: Arc<TrafficLedger>,
    backend_timeout: Duration,
    stats: EngineStats,
}

impl DecisionEngine {
    pub fn new(
        policies: Arc<PolicyStore>,
        counters: Arc<dyn CounterBackend>,
        recorder: ViolationRecorder,
    ) -> Self {
        Self {
            resolver: PolicyResolver::new(policies),
            counters,
            bursts: Arc::new(BurstLimiter::new()),
            recorder,
            ledger: Arc::new(TrafficLedger::new(60)),
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            stats: EngineStats::default(),
        }
    }

    pub fn with_burst_limiter(mut self, bursts: Arc<BurstLimiter>) -> Self {
        self.bursts = bursts;
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<TrafficLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn policies(&self) -> &Arc<PolicyStore> {
        self.resolver.store()
    }

    pub fn counters(&self) -> &Arc<dyn CounterBackend> {
        &self.counters
    }

    pub fn bursts(&self) -> &Arc<BurstLimiter> {
        &self.bursts
    }

    pub fn ledger(&self) -> &Arc<TrafficLedger> {
        &self.ledger
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Honor an external policy change.
    pub fn invalidate(&self, policy_id: PolicyId) -> Result<()> {
        self.resolver.store().invalidate(policy_id)
    }

    /// Decide on a request using the current time.
    pub async fn check(&self, request: &RequestDescriptor) -> Decision {
        self.check_at(request, Utc::now()).await
    }

    /// Decide on a request at `now`.
    ///
    /// `now` is the single time snapshot used for every window computed while
    /// handling this request.
    pub async fn check_at(&self, request: &RequestDescriptor, now: DateTime<Utc>) -> Decision {
        let resolved = self.resolver.resolve(request);
        trace!(
            identifier = %request.identifier,
            path = %request.path,
            method = %request.method,
            policies = resolved.len(),
            "Checking admission"
        );

        let mut tightest: Option<Decision> = None;
        let mut degraded = false;

        for candidate in &resolved {
            let policy = candidate.policy();
            let limit = candidate.effective_limit;
            let (window_start, window_end) = policy.window.bounds(now);
            let key = CounterKey::new(policy.id, &request.identifier, window_start);

            let mut burst = None;
            if let Some(config) = &policy.burst {
                match self.bursts.try_consume(policy.id, &request.identifier, config, now) {
                    BurstOutcome::Allowed { remaining } => {
                        burst = Some(BurstInfo {
                            max_tokens: config.max_tokens,
                            remaining: remaining.floor() as u32,
                        });
                    }
                    BurstOutcome::Denied { retry_after } => {
                        let count = self.current_count(&key, now).await;
                        let denial = Denial {
                            candidate,
                            reason: DenyReason::Burst,
                            window_start,
                            window_end,
                            count,
                            retry_after_secs: ceil_secs(retry_after),
                            burst: Some(BurstInfo {
                                max_tokens: config.max_tokens,
                                remaining: 0,
                            }),
                        };
                        return self.deny(request, denial, now, degraded).await;
                    }
                }
            }

            match self.acquire(&key, limit, window_end).await {
                Ok(Admission::Admitted(count)) => {
                    self.ledger.observe(policy.id, now, false);
                    let remaining = limit.saturating_sub(count);
                    let tighter = tightest
                        .as_ref()
                        .and_then(|t| t.remaining)
                        .map_or(true, |current| remaining <= current);
                    if tighter {
                        tightest = Some(Decision {
                            allowed: true,
                            policy: Some(policy.name.clone()),
                            policy_id: Some(policy.id),
                            limit: Some(limit),
                            remaining: Some(remaining),
                            reset_at: Some(window_end),
                            retry_after_secs: None,
                            reason: None,
                            burst,
                            degraded: false,
                        });
                    }
                }
                Ok(Admission::Exhausted(count)) => {
                    let until_reset = (window_end - now).to_std().unwrap_or_default();
                    let denial = Denial {
                        candidate,
                        reason: DenyReason::Window,
                        window_start,
                        window_end,
                        count,
                        retry_after_secs: ceil_secs(until_reset),
                        burst,
                    };
                    return self.deny(request, denial, now, degraded).await;
                }
                Err(e) => {
                    degraded = true;
                    self.stats.degraded.fetch_add(1, Ordering::Relaxed);
                    self.ledger.observe(policy.id, now, false);
                    warn!(
                        policy = %policy.name,
                        identifier = %request.identifier,
                        error = %e,
                        "Counter backend unavailable, failing open"
                    );
                }
            }
        }

        self.stats.allowed.fetch_add(1, Ordering::Relaxed);
        let mut decision = tightest.unwrap_or_else(Decision::unrestricted);
        decision.degraded = degraded;
        decision
    }

    /// Atomic window check-and-increment, bounded by the backend timeout.
    async fn acquire(
        &self,
        key: &CounterKey,
        limit: u64,
        window_end: DateTime<Utc>,
    ) -> Result<Admission> {
        match tokio::time::timeout(
            self.backend_timeout,
            self.counters.try_acquire(key, limit, window_end),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GatekeeperError::BackingStoreUnavailable(format!(
                "counter update timed out after {}ms",
                self.backend_timeout.as_millis()
            ))),
        }
    }

    /// Window count for reporting only; a failing backend reads as 0.
    async fn current_count(&self, key: &CounterKey, now: DateTime<Utc>) -> u64 {
        match tokio::time::timeout(self.backend_timeout, self.counters.get(key, now)).await {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                debug!(key = %key, error = %e, "Counter read failed");
                0
            }
            Err(_) => {
                debug!(key = %key, "Counter read timed out");
                0
            }
        }
    }

    async fn deny(
        &self,
        request: &RequestDescriptor,
        denial: Denial<'_>,
        now: DateTime<Utc>,
        degraded: bool,
    ) -> Decision {
        let policy = denial.candidate.policy();
        let limit = denial.candidate.effective_limit;
        self.stats.denied.fetch_add(1, Ordering::Relaxed);
        self.ledger.observe(policy.id, now, true);

        let observed_count = denial.count + 1;
        let (action, over_limit) = match denial.reason {
            DenyReason::Window => (ViolationAction::Window, observed_count.saturating_sub(limit)),
            DenyReason::Burst => (ViolationAction::Burst, 1),
        };

        debug!(
            policy = %policy.name,
            identifier = %request.identifier,
            path = %request.path,
            reason = ?denial.reason,
            count = denial.count,
            limit,
            "Request denied"
        );

        self.recorder
            .record(ViolationRecord {
                id: Uuid::new_v4(),
                policy_id: policy.id,
                policy_name: policy.name.clone(),
                identifier: request.identifier.clone(),
                endpoint: request.path.clone(),
                method: request.method.clone(),
                origin: request.origin().map(str::to_string),
                window_start: denial.window_start,
                observed_count,
                over_limit,
                action,
                timestamp: now,
            })
            .await;

        Decision {
            allowed: false,
            policy: Some(policy.name.clone()),
            policy_id: Some(policy.id),
            limit: Some(limit),
            remaining: Some(limit.saturating_sub(denial.count)),
            reset_at: Some(denial.window_end),
            retry_after_secs: Some(denial.retry_after_secs),
            reason: Some(denial.reason),
            burst: denial.burst,
            degraded,
        }
    }
}

#[async_trait]
impl AdmissionControl for DecisionEngine {
    async fn check(&self, request: &RequestDescriptor) -> Decision {
        DecisionEngine::check(self, request).await
    }
}

/// Whole seconds, rounded up, at least 1.
fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Policy, StaticPolicySource, Target};
    use crate::ratelimit::{InMemoryCounterStore, WindowKind};
    use crate::violations::{InMemoryViolationStore, ViolationQuery, ViolationStore};
    use chrono::TimeZone;

    struct Harness {
        engine: Arc<DecisionEngine>,
        counters: Arc<InMemoryCounterStore>,
        violations: Arc<InMemoryViolationStore>,
    }

    fn harness(policies: Vec<Policy>) -> Harness {
        let store = PolicyStore::new();
        for policy in policies {
            store.upsert(policy).unwrap();
        }
        let counters = Arc::new(InMemoryCounterStore::new());
        let violations = Arc::new(InMemoryViolationStore::new(10_000));
        let recorder = ViolationRecorder::new(violations.clone(), Duration::from_millis(100));
        let engine = DecisionEngine::new(Arc::new(store), counters.clone(), recorder);
        Harness {
            engine: Arc::new(engine),
            counters,
            violations,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    fn per_ip(limit: u64) -> Policy {
        Policy::new(1, "per-ip", Target::Caller("ip:*".into()), WindowKind::Minute, limit)
    }

    async fn count(h: &Harness, policy: u64, identifier: &str, now: DateTime<Utc>) -> u64 {
        let key = CounterKey::new(PolicyId(policy), identifier, WindowKind::Minute.start(now));
        h.counters.get(&key, now).await.unwrap()
    }

    #[tokio::test]
    async fn test_no_policy_is_unrestricted() {
        let h = harness(vec![]);
        let decision = h.engine.check(&RequestDescriptor::new("user:1", "/")).await;
        assert!(decision.allowed);
        assert!(decision.limit.is_none());
        assert_eq!(h.engine.stats().allowed, 1);
    }

    #[tokio::test]
    async fn test_scenario_sequential_window() {
        let h = harness(vec![per_ip(5)]);
        let request = RequestDescriptor::new("ip:10.0.0.1", "/api/items");
        let now = t0() + secs(10);

        for expected in [4, 3, 2, 1, 0] {
            let decision = h.engine.check_at(&request, now).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, Some(expected));
            assert_eq!(decision.limit, Some(5));
            assert_eq!(decision.reset_at, Some(t0() + secs(60)));
        }

        let denied = h.engine.check_at(&request, now).await;
        assert!(!denied.allowed);
        assert_eq!(denied.reason, Some(DenyReason::Window));
        assert_eq!(denied.remaining, Some(0));
        let retry_after = denied.retry_after_secs.unwrap();
        assert!(retry_after <= 60);
        assert_eq!(retry_after, 50);
        assert_eq!(denied.status_code(), 429);
    }

    #[tokio::test]
    async fn test_next_window_admits_again() {
        let h = harness(vec![per_ip(2)]);
        let request = RequestDescriptor::new("ip:10.0.0.1", "/");

        assert!(h.engine.check_at(&request, t0()).await.allowed);
        assert!(h.engine.check_at(&request, t0() + secs(30)).await.allowed);
        assert!(!h.engine.check_at(&request, t0() + secs(59)).await.allowed);

        let next = h.engine.check_at(&request, t0() + secs(60)).await;
        assert!(next.allowed);
        assert_eq!(next.remaining, Some(1));
    }

    #[tokio::test]
    async fn test_identifiers_counted_separately() {
        let h = harness(vec![per_ip(1)]);
        assert!(h.engine.check_at(&RequestDescriptor::new("ip:1.1.1.1", "/"), t0()).await.allowed);
        assert!(h.engine.check_at(&RequestDescriptor::new("ip:2.2.2.2", "/"), t0()).await.allowed);
        assert!(!h.engine.check_at(&RequestDescriptor::new("ip:1.1.1.1", "/"), t0()).await.allowed);
    }

    #[tokio::test]
    async fn test_denial_short_circuits_lower_priority() {
        let h = harness(vec![
            Policy::new(1, "strict", Target::Global, WindowKind::Minute, 1).with_priority(10),
            Policy::new(2, "loose", Target::Global, WindowKind::Minute, 100).with_priority(5),
        ]);
        let request = RequestDescriptor::new("user:1", "/");

        let first = h.engine.check_at(&request, t0()).await;
        assert!(first.allowed);
        assert_eq!(count(&h, 1, "user:1", t0()).await, 1);
        let loose_after_first = count(&h, 2, "user:1", t0()).await;

        let second = h.engine.check_at(&request, t0()).await;
        assert!(!second.allowed);
        assert_eq!(second.policy.as_deref(), Some("strict"));
        assert_eq!(count(&h, 1, "user:1", t0()).await, 1);
        assert_eq!(count(&h, 2, "user:1", t0()).await, loose_after_first);
    }

    #[tokio::test]
    async fn test_reports_most_restrictive_policy() {
        let h = harness(vec![
            Policy::new(1, "wide", Target::Global, WindowKind::Minute, 10).with_priority(5),
            Policy::new(2, "narrow", Target::Global, WindowKind::Minute, 3).with_priority(1),
        ]);
        let decision = h.engine.check_at(&RequestDescriptor::new("u", "/"), t0()).await;
        assert!(decision.allowed);
        assert_eq!(decision.policy.as_deref(), Some("narrow"));
        assert_eq!(decision.remaining, Some(2));

        let headers = decision.headers();
        assert!(headers.contains(&("X-RateLimit-Limit", "3".to_string())));
        assert!(!headers.iter().any(|(name, _)| *name == "Retry-After"));
    }

    #[tokio::test]
    async fn test_method_override_limit() {
        let h = harness(vec![per_ip(100).with_method_limit("POST", 1)]);
        let post = RequestDescriptor::new("ip:10.0.0.1", "/").with_method("POST");
        let get = RequestDescriptor::new("ip:10.0.0.1", "/");

        assert!(h.engine.check_at(&post, t0()).await.allowed);
        let denied = h.engine.check_at(&post, t0()).await;
        assert!(!denied.allowed);
        assert_eq!(denied.limit, Some(1));

        let allowed = h.engine.check_at(&get, t0()).await;
        assert!(allowed.allowed);
        assert_eq!(allowed.limit, Some(100));
    }

    #[tokio::test]
    async fn test_burst_then_window_gates() {
        let h = harness(vec![per_ip(5).with_burst(3, 60)]);
        let request = RequestDescriptor::new("ip:10.0.0.1", "/");

        for remaining in [2, 1, 0] {
            let decision = h.engine.check_at(&request, t0()).await;
            assert!(decision.allowed);
            assert_eq!(decision.burst.unwrap().remaining, remaining);
        }

        let burst_denied = h.engine.check_at(&request, t0()).await;
        assert!(!burst_denied.allowed);
        assert_eq!(burst_denied.reason, Some(DenyReason::Burst));
        assert_eq!(burst_denied.retry_after_secs, Some(20));
        // Burst denial leaves the window counter alone
        assert_eq!(count(&h, 1, "ip:10.0.0.1", t0()).await, 3);

        // Two tokens refilled: the window's last two admits
        let later = t0() + secs(41);
        assert!(h.engine.check_at(&request, later).await.allowed);
        let last = h.engine.check_at(&request, later).await;
        assert!(last.allowed);
        assert_eq!(last.remaining, Some(0));

        assert!(!h.engine.check_at(&request, t0() + secs(59)).await.allowed);
    }

    #[tokio::test]
    async fn test_burst_tokens_do_not_override_exhausted_window() {
        let policy = Policy::new(1, "hourly", Target::Caller("ip:*".into()), WindowKind::Hour, 5)
            .with_burst(3, 60);
        let h = harness(vec![policy]);
        let request = RequestDescriptor::new("ip:10.0.0.1", "/");

        for _ in 0..3 {
            assert!(h.engine.check_at(&request, t0()).await.allowed);
        }
        let later = t0() + secs(41);
        assert!(h.engine.check_at(&request, later).await.allowed);
        assert!(h.engine.check_at(&request, later).await.allowed);

        // Bucket is full again, the window is not
        let refilled = t0() + secs(200);
        let denied = h.engine.check_at(&request, refilled).await;
        assert!(!denied.allowed);
        assert_eq!(denied.reason, Some(DenyReason::Window));
    }

    #[tokio::test]
    async fn test_violation_recorded_on_denial() {
        let h = harness(vec![per_ip(5)]);
        let request = RequestDescriptor::new("ip:10.0.0.1", "/api/items").with_method("PUT");
        for _ in 0..6 {
            h.engine.check_at(&request, t0()).await;
        }

        let records = h.violations.query(&ViolationQuery::default()).await.unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.policy_id, PolicyId(1));
        assert_eq!(record.identifier, "ip:10.0.0.1");
        assert_eq!(record.endpoint, "/api/items");
        assert_eq!(record.method, "PUT");
        assert_eq!(record.origin.as_deref(), Some("10.0.0.1"));
        assert_eq!(record.observed_count, 6);
        assert_eq!(record.over_limit, 1);
        assert_eq!(record.action, ViolationAction::Window);
        assert_eq!(record.window_start, t0());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_checks_admit_exactly_limit() {
        let h = harness(vec![per_ip(10)]);
        let now = t0();

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let engine = h.engine.clone();
                tokio::spawn(async move {
                    engine
                        .check_at(&RequestDescriptor::new("ip:10.0.0.1", "/"), now)
                        .await
                        .allowed
                })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 10);
        assert_eq!(count(&h, 1, "ip:10.0.0.1", now).await, 10);
        assert_eq!(h.engine.stats().denied, 40);
        assert_eq!(h.violations.len(), 40);
    }

    struct FailingBackend;

    #[async_trait]
    impl CounterBackend for FailingBackend {
        async fn get(&self, _: &CounterKey, _: DateTime<Utc>) -> Result<u64> {
            Err(GatekeeperError::BackingStoreUnavailable("down".into()))
        }

        async fn increment(&self, _: &CounterKey, _: DateTime<Utc>) -> Result<u64> {
            Err(GatekeeperError::BackingStoreUnavailable("down".into()))
        }

        async fn try_acquire(&self, _: &CounterKey, _: u64, _: DateTime<Utc>) -> Result<Admission> {
            Err(GatekeeperError::BackingStoreUnavailable("down".into()))
        }

        async fn sweep(&self, _: DateTime<Utc>) -> Result<usize> {
            Ok(0)
        }
    }

    struct HangingBackend;

    #[async_trait]
    impl CounterBackend for HangingBackend {
        async fn get(&self, _: &CounterKey, _: DateTime<Utc>) -> Result<u64> {
            futures::future::pending().await
        }

        async fn increment(&self, _: &CounterKey, _: DateTime<Utc>) -> Result<u64> {
            futures::future::pending().await
        }

        async fn try_acquire(&self, _: &CounterKey, _: u64, _: DateTime<Utc>) -> Result<Admission> {
            futures::future::pending().await
        }

        async fn sweep(&self, _: DateTime<Utc>) -> Result<usize> {
            Ok(0)
        }
    }

    fn engine_on(backend: Arc<dyn CounterBackend>) -> DecisionEngine {
        let store = PolicyStore::new();
        store.upsert(per_ip(1)).unwrap();
        let recorder = ViolationRecorder::new(
            Arc::new(InMemoryViolationStore::new(10)),
            Duration::from_millis(100),
        );
        DecisionEngine::new(Arc::new(store), backend, recorder)
            .with_backend_timeout(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_backend_failure_fails_open() {
        let engine = engine_on(Arc::new(FailingBackend));
        let request = RequestDescriptor::new("ip:10.0.0.1", "/");

        for _ in 0..3 {
            let decision = engine.check_at(&request, t0()).await;
            assert!(decision.allowed);
            assert!(decision.degraded);
        }
        assert_eq!(engine.stats().degraded, 3);
        assert_eq!(engine.stats().denied, 0);
    }

    #[tokio::test]
    async fn test_backend_timeout_fails_open() {
        let engine = engine_on(Arc::new(HangingBackend));
        let decision = engine.check_at(&RequestDescriptor::new("ip:10.0.0.1", "/"), t0()).await;
        assert!(decision.allowed);
        assert!(decision.degraded);
    }

    #[tokio::test]
    async fn test_invalidate_applies_new_limit() {
        let source = Arc::new(StaticPolicySource::new(vec![per_ip(1)]));
        let store = Arc::new(PolicyStore::with_source(source.clone()).unwrap());
        let recorder = ViolationRecorder::new(
            Arc::new(InMemoryViolationStore::new(10)),
            Duration::from_millis(100),
        );
        let engine = DecisionEngine::new(store, Arc::new(InMemoryCounterStore::new()), recorder);
        let request = RequestDescriptor::new("ip:10.0.0.1", "/");

        assert!(engine.check_at(&request, t0()).await.allowed);
        assert!(!engine.check_at(&request, t0()).await.allowed);

        source.put(per_ip(3));
        engine.invalidate(PolicyId(1)).unwrap();
        let decision = engine.check_at(&request, t0()).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, Some(1));
    }

    #[tokio::test]
    async fn test_ledger_counts_evaluated_policies() {
        let h = harness(vec![per_ip(1)]);
        let request = RequestDescriptor::new("ip:10.0.0.1", "/");
        h.engine.check_at(&request, t0()).await;
        h.engine.check_at(&request, t0()).await;

        let start = h.engine.ledger().bucket_start(t0());
        let totals = h.engine.ledger().peek(PolicyId(1), start);
        assert_eq!(totals.observed, 2);
        assert_eq!(totals.blocked, 1);
    }

    #[tokio::test]
    async fn test_usable_as_trait_object() {
        let h = harness(vec![per_ip(1)]);
        let admission: Arc<dyn AdmissionControl> = h.engine.clone();
        assert!(admission.check(&RequestDescriptor::new("ip:10.0.0.1", "/")).await.allowed);
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::from_millis(0)), 1);
        assert_eq!(ceil_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ceil_secs(Duration::from_secs(50)), 50);
    }
}
