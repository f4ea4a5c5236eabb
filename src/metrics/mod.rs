pub mod flush;
pub mod queue;
pub mod rate;
pub mod value;
pub mod window;

pub use flush::{FlushCoordinator, FlushReport, Snapshot};
pub use queue::{PushOutcome, SampleQueue, SampleReceiver};
pub use rate::{RateAggregator, RateMetricRecord, RateStats, RateStore};
pub use value::{ValueAggregator, ValueMetricRecord, ValueStore};
pub use window::{next_boundary, step_for_interval, WindowScheduler, WindowTiming};

/// A single raw observation submitted by instrumented code.
/// Lives only inside a queue slot until an aggregator consumes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Metric name, e.g. "cpu"
    pub metric_name: String,
    /// Per-metric key, e.g. "core0"
    pub key: String,
    pub value: f64,
}

impl Sample {
    pub fn new(metric_name: impl Into<String>, key: impl Into<String>, value: f64) -> Self {
        Self {
            metric_name: metric_name.into(),
            key: key.into(),
            value,
        }
    }
}
