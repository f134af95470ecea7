//! Violation recording and alerting.
//!
//! Every denial produces exactly one [`ViolationRecord`]. The recorder writes
//! it on the request path; the alert worker picks it up from a queue and runs
//! the [`AlertEvaluator`] on its own task.

mod alerts;
mod notify;
mod record;
mod recorder;
mod store;

pub use alerts::{run_alert_worker, AlertEvaluator, AlertRule, FiredAlert};
pub use notify::{Alert, LogNotifier, Notifier};
pub use record::{ViolationAction, ViolationQuery, ViolationRecord};
pub use recorder::ViolationRecorder;
pub use store::{InMemoryViolationStore, ViolationStore};
