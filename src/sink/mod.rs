use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use crate::error::SinkError;
use crate::metrics::{RateMetricRecord, ValueMetricRecord};

// ─── Sink contract ───────────────────────────────────────────────

/// External receiver of finished metric records.
///
/// Only the flush coordinator and the monitor's control surface call
/// into a sink; producer and aggregator threads never do.
pub trait MetricSink: Send + Sync {
    fn send_metric(&self, record: &ValueMetricRecord);

    fn send_derived_metric(&self, record: &RateMetricRecord);

    fn add_global_tag(&self, _key: &str, _value: &str) {}

    fn set_run_number(&self, _run_number: u32) {}

    /// `None` lets the sink pick its own period.
    fn enable_process_monitoring(&self, _interval_secs: Option<u32>) {}
}

/// Build the sink named by a backend URI. Empty means "no sink".
///
/// The URI must be `scheme://` followed by an optional target. The
/// built-in `log` and `stdout` sinks take no target and ignore one.
pub fn from_backend(uri: &str) -> Result<Option<Arc<dyn MetricSink>>, SinkError> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Ok(None);
    }
    let Some((scheme, _target)) = uri.split_once("://") else {
        return Err(SinkError::MalformedBackend(uri.to_string()));
    };
    match scheme {
        "" => Err(SinkError::MalformedBackend(uri.to_string())),
        "log" => Ok(Some(Arc::new(LogSink))),
        "stdout" => Ok(Some(Arc::new(StdoutSink::new()))),
        _ => Err(SinkError::UnsupportedBackend(uri.to_string())),
    }
}

// ─── LogSink ─────────────────────────────────────────────────────

/// Renders every record as a structured `tracing` event.
pub struct LogSink;

impl MetricSink for LogSink {
    fn send_metric(&self, record: &ValueMetricRecord) {
        for (key, values) in &record.values {
            tracing::info!(
                name = %record.metric_name,
                key = %key,
                count = values.len(),
                values = ?values,
                "metric"
            );
        }
    }

    fn send_derived_metric(&self, record: &RateMetricRecord) {
        for (key, stats) in &record.stats {
            tracing::info!(
                name = %record.metric_name,
                key = %key,
                min = stats.min,
                max = stats.max,
                mean = stats.mean().unwrap_or(0.0),
                count = stats.count,
                "rate metric"
            );
        }
    }

    fn add_global_tag(&self, key: &str, value: &str) {
        tracing::info!(key, value, "global tag");
    }

    fn set_run_number(&self, run_number: u32) {
        tracing::info!(run_number, "run number");
    }

    fn enable_process_monitoring(&self, interval_secs: Option<u32>) {
        tracing::info!(?interval_secs, "process monitoring requested");
    }
}

// ─── StdoutSink ──────────────────────────────────────────────────

/// Writes one JSON line per `(name, key)` to stdout, carrying the global
/// tags and run number known at the time of the write.
pub struct StdoutSink {
    context: Mutex<SinkContext>,
}

#[derive(Default)]
struct SinkContext {
    tags: BTreeMap<String, String>,
    run_number: Option<u32>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            context: Mutex::new(SinkContext::default()),
        }
    }

    fn write_lines(&self, lines: Vec<serde_json::Value>) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for line in lines {
            if let Err(e) = writeln!(out, "{line}") {
                tracing::warn!(error = %e, "stdout sink write failed");
                return;
            }
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSink for StdoutSink {
    fn send_metric(&self, record: &ValueMetricRecord) {
        let (tags, run) = {
            let ctx = self.context.lock();
            (ctx.tags.clone(), ctx.run_number)
        };
        let lines = record
            .values
            .iter()
            .map(|(key, values)| {
                json!({
                    "timestamp": record.timestamp.to_rfc3339(),
                    "name":      record.metric_name,
                    "key":       key,
                    "values":    values,
                    "tags":      tags,
                    "run":       run,
                })
            })
            .collect();
        self.write_lines(lines);
    }

    fn send_derived_metric(&self, record: &RateMetricRecord) {
        let (tags, run) = {
            let ctx = self.context.lock();
            (ctx.tags.clone(), ctx.run_number)
        };
        let lines = record
            .stats
            .iter()
            .map(|(key, stats)| {
                json!({
                    "timestamp":   record.timestamp.to_rfc3339(),
                    "name":        record.metric_name,
                    "key":         key,
                    "min":         stats.min,
                    "max":         stats.max,
                    "mean":        stats.mean(),
                    "count":       stats.count,
                    "rate_per_sec": stats.rate_per_sec(record.window),
                    "tags":        tags,
                    "run":         run,
                })
            })
            .collect();
        self.write_lines(lines);
    }

    fn add_global_tag(&self, key: &str, value: &str) {
        self.context
            .lock()
            .tags
            .insert(key.to_string(), value.to_string());
    }

    fn set_run_number(&self, run_number: u32) {
        self.context.lock().run_number = Some(run_number);
    }
}

// ─── MemorySink ──────────────────────────────────────────────────

/// Keeps every emitted record in memory. Handy for tests and for hosts
/// that want to inspect snapshots themselves.
#[derive(Default)]
pub struct MemorySink {
    inner: Mutex<MemoryContents>,
}

/// Everything a [`MemorySink`] has received so far.
#[derive(Debug, Clone, Default)]
pub struct MemoryContents {
    pub values: Vec<ValueMetricRecord>,
    pub rates: Vec<RateMetricRecord>,
    pub tags: BTreeMap<String, String>,
    pub run_number: Option<u32>,
    pub process_monitoring: Option<Option<u32>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> MemoryContents {
        self.inner.lock().clone()
    }

    pub fn value_records(&self) -> Vec<ValueMetricRecord> {
        self.inner.lock().values.clone()
    }

    pub fn rate_records(&self) -> Vec<RateMetricRecord> {
        self.inner.lock().rates.clone()
    }

    /// Emitted record count (value + rate).
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.values.len() + inner.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricSink for MemorySink {
    fn send_metric(&self, record: &ValueMetricRecord) {
        self.inner.lock().values.push(record.clone());
    }

    fn send_derived_metric(&self, record: &RateMetricRecord) {
        self.inner.lock().rates.push(record.clone());
    }

    fn add_global_tag(&self, key: &str, value: &str) {
        self.inner
            .lock()
            .tags
            .insert(key.to_string(), value.to_string());
    }

    fn set_run_number(&self, run_number: u32) {
        self.inner.lock().run_number = Some(run_number);
    }

    fn enable_process_monitoring(&self, interval_secs: Option<u32>) {
        self.inner.lock().process_monitoring = Some(interval_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_selection() {
        assert!(from_backend("").unwrap().is_none());
        assert!(from_backend("  ").unwrap().is_none());
        assert!(from_backend("log://").unwrap().is_some());
        assert!(from_backend("stdout://").unwrap().is_some());
        assert!(matches!(
            from_backend("influxdb-udp://host:8089"),
            Err(SinkError::UnsupportedBackend(uri)) if uri == "influxdb-udp://host:8089"
        ));
    }

    #[test]
    fn backend_without_separator_is_malformed() {
        for uri in ["stdout:", "stdout", "log:/", "://"] {
            assert!(
                matches!(from_backend(uri), Err(SinkError::MalformedBackend(ref u)) if u == uri),
                "{uri} should be rejected as malformed"
            );
        }
        // A trailing target on a built-in sink is accepted.
        assert!(from_backend("stdout://ignored").unwrap().is_some());
    }

    #[test]
    fn memory_sink_records_everything() {
        let sink = MemorySink::new();
        sink.add_global_tag("partition", "p1");
        sink.set_run_number(42);
        sink.enable_process_monitoring(None);

        let mut value = ValueMetricRecord::new("cpu");
        value.observe("core0".into(), 0.5);
        sink.send_metric(&value);

        let mut rate = RateMetricRecord::new("net");
        rate.observe("rx".into(), 1.0);
        sink.send_derived_metric(&rate);

        let contents = sink.contents();
        assert_eq!(contents.values, vec![value]);
        assert_eq!(contents.rates, vec![rate]);
        assert_eq!(contents.tags["partition"], "p1");
        assert_eq!(contents.run_number, Some(42));
        assert_eq!(contents.process_monitoring, Some(None));
        assert_eq!(sink.len(), 2);
    }
}
