//! Reporting metrics, computed off the request path.

mod aggregator;
mod ledger;

pub use aggregator::{InMemoryMetricsStore, MetricsAggregator, MetricsBucket, MetricsSink};
pub use ledger::{TrafficLedger, TrafficTotals};
