//! In-process metrics aggregation pipeline.
//!
//! Instrumented code pushes raw samples into two bounded queues; one
//! aggregator per queue folds them into per-window state; a scheduler
//! flushes that state on a wall-clock aligned grid and hands the
//! snapshot to a [`sink::MetricSink`].

pub mod config;
pub mod error;
pub mod load_generator;
pub mod metrics;
pub mod monitor;
pub mod sink;

pub use config::MonitoringOptions;
pub use error::{ConfigError, MonitorError, SinkError};
pub use metrics::{RateMetricRecord, RateStats, Sample, Snapshot, ValueMetricRecord};
pub use monitor::{Monitor, MonitorState, MonitorStats};
pub use sink::{MemorySink, MetricSink};
