//! Rate limiting logic and state management.

mod backend;
mod burst;
mod counter;
mod decision;
mod descriptor;
mod engine;
mod sweeper;
mod window;

pub use backend::{Admission, CounterBackend};
pub use burst::{BurstLimiter, BurstOutcome};
pub use counter::{CounterEntry, InMemoryCounterStore};
pub use decision::{BurstInfo, Decision, DenyReason, STATUS_TOO_MANY_REQUESTS};
pub use descriptor::{CounterKey, RequestDescriptor};
pub use engine::{
    AdmissionControl, DecisionEngine, EngineStats, EngineStatsSnapshot, DEFAULT_BACKEND_TIMEOUT,
};
pub use sweeper::CounterSweeper;
pub use window::WindowKind;
