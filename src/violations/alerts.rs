//! Threshold alerting over recorded violations.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::notify::{Alert, Notifier};
use super::record::ViolationRecord;
use super::store::ViolationStore;
use crate::error::{GatekeeperError, Result};
use crate::policy::PolicyId;
use crate::scheduler::ShutdownSignal;

/// Fires when a policy (or any policy) collects `threshold_count` violations
/// within `threshold_window_secs`, then stays quiet for `cooldown_secs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: u64,
    /// `None` watches every policy
    #[serde(default)]
    pub policy_id: Option<PolicyId>,
    pub threshold_count: u64,
    pub threshold_window_secs: u64,
    pub cooldown_secs: u64,
    /// Names of registered notification channels
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trigger_count: u64,
}

fn default_active() -> bool {
    true
}

impl AlertRule {
    /// Reject rules whose thresholds cannot be evaluated.
    pub fn validate(&self) -> Result<()> {
        if self.threshold_count == 0 {
            return Err(GatekeeperError::Config(format!(
                "alert rule {}: threshold_count must be greater than zero",
                self.id
            )));
        }
        if self.threshold_window_secs == 0 || seconds(self.threshold_window_secs).is_none() {
            return Err(GatekeeperError::Config(format!(
                "alert rule {}: threshold_window_secs {} is out of range",
                self.id, self.threshold_window_secs
            )));
        }
        if seconds(self.cooldown_secs).is_none() {
            return Err(GatekeeperError::Config(format!(
                "alert rule {}: cooldown_secs {} is out of range",
                self.id, self.cooldown_secs
            )));
        }
        Ok(())
    }

    pub fn applies_to(&self, policy_id: PolicyId) -> bool {
        self.policy_id.map_or(true, |id| id == policy_id)
    }

    /// A cooldown reaching past the representable range never ends.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.last_triggered.is_some_and(|t| {
            seconds(self.cooldown_secs)
                .and_then(|cooldown| t.checked_add_signed(cooldown))
                .map_or(true, |until| now < until)
        })
    }

    /// Start of the threshold window ending at `now`.
    fn window_since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        seconds(self.threshold_window_secs)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

/// A rule that fired, with the delivery tasks spawned for it.
#[derive(Debug)]
pub struct FiredAlert {
    pub alert: Alert,
    pub deliveries: Vec<JoinHandle<()>>,
}

/// Evaluates alert rules against each new violation.
///
/// Runs on the alert worker, never on the request path. The rule lock is only
/// held for the cooldown re-check and trigger bookkeeping, never across an
/// await.
pub struct AlertEvaluator {
    rules: RwLock<Vec<AlertRule>>,
    violations: Arc<dyn ViolationStore>,
    notifiers: HashMap<String, Arc<dyn Notifier>>,
    notify_timeout: std::time::Duration,
}

impl AlertEvaluator {
    pub fn new(violations: Arc<dyn ViolationStore>, rules: Vec<AlertRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
            violations,
            notifiers: HashMap::new(),
            notify_timeout: std::time::Duration::from_secs(5),
        }
    }

    /// Register a notification channel under `name`.
    pub fn with_notifier(mut self, name: impl Into<String>, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.insert(name.into(), notifier);
        self
    }

    pub fn with_notify_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// Current rules, including trigger bookkeeping.
    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules.read().clone()
    }

    /// Insert or replace a rule (external edit).
    pub fn upsert_rule(&self, rule: AlertRule) {
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
    }

    /// Evaluate every applicable rule for a freshly recorded violation.
    pub async fn evaluate(&self, violation: &ViolationRecord, now: DateTime<Utc>) -> Vec<FiredAlert> {
        let candidates: Vec<AlertRule> = self
            .rules
            .read()
            .iter()
            .filter(|r| r.active && r.applies_to(violation.policy_id) && !r.in_cooldown(now))
            .cloned()
            .collect();

        let mut fired = Vec::new();
        for rule in candidates {
            let since = rule.window_since(now);
            // The violation being evaluated is already stored at `now`
            let until = now + Duration::milliseconds(1);
            let count = match self.violations.count(rule.policy_id, since, until).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(rule_id = rule.id, error = %e, "Could not count violations for alert rule");
                    continue;
                }
            };
            if count < rule.threshold_count {
                continue;
            }

            // Another violation may have fired this rule while we were counting
            let Some(rule) = self.mark_triggered(rule.id, now) else {
                debug!(rule_id = rule.id, "Alert rule already triggered, in cooldown");
                continue;
            };

            let alert = Alert {
                rule_id: rule.id,
                policy_id: rule.policy_id,
                policy_name: violation.policy_name.clone(),
                violation_count: count,
                threshold_count: rule.threshold_count,
                threshold_window_secs: rule.threshold_window_secs,
                identifier: violation.identifier.clone(),
                endpoint: violation.endpoint.clone(),
                triggered_at: now,
            };
            info!(
                rule_id = rule.id,
                policy = %alert.policy_name,
                violations = count,
                trigger_count = rule.trigger_count,
                "Alert rule fired"
            );

            let deliveries = self.dispatch(&rule, &alert);
            fired.push(FiredAlert { alert, deliveries });
        }
        fired
    }

    fn mark_triggered(&self, rule_id: u64, now: DateTime<Utc>) -> Option<AlertRule> {
        let mut rules = self.rules.write();
        let rule = rules.iter_mut().find(|r| r.id == rule_id)?;
        if !rule.active || rule.in_cooldown(now) {
            return None;
        }
        rule.last_triggered = Some(now);
        rule.trigger_count += 1;
        Some(rule.clone())
    }

    /// Deliver to each channel on its own task.
    fn dispatch(&self, rule: &AlertRule, alert: &Alert) -> Vec<JoinHandle<()>> {
        let mut deliveries = Vec::with_capacity(rule.targets.len());
        for target in &rule.targets {
            let Some(notifier) = self.notifiers.get(target).cloned() else {
                warn!(rule_id = rule.id, channel = %target, "Unknown notification channel");
                continue;
            };

            let alert = alert.clone();
            let channel = target.clone();
            let timeout = self.notify_timeout;
            deliveries.push(tokio::spawn(async move {
                match tokio::time::timeout(timeout, notifier.notify(&alert)).await {
                    Ok(Ok(())) => debug!(rule_id = alert.rule_id, channel = %channel, "Alert delivered"),
                    Ok(Err(e)) => {
                        warn!(rule_id = alert.rule_id, channel = %channel, error = %e, "Alert delivery failed")
                    }
                    Err(_) => warn!(rule_id = alert.rule_id, channel = %channel, "Alert delivery timed out"),
                }
            }));
        }
        deliveries
    }
}

/// Consume violations from the recorder until shutdown.
pub async fn run_alert_worker(
    evaluator: Arc<AlertEvaluator>,
    mut violations: mpsc::Receiver<ViolationRecord>,
    mut shutdown: ShutdownSignal,
) {
    info!("Alert worker started");
    loop {
        tokio::select! {
            received = violations.recv() => match received {
                Some(violation) => {
                    // Judge against when it happened, not when the queue caught up
                    evaluator.evaluate(&violation, violation.timestamp).await;
                }
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
    info!("Alert worker stopped");
}
