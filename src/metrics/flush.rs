use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::queue::SampleQueue;
use super::rate::{RateMetricRecord, RateStore};
use super::value::{ValueMetricRecord, ValueStore};
use crate::sink::MetricSink;

// ─── Public types ────────────────────────────────────────────────

/// Immutable picture of one window, owned by whoever flushed it.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, ValueMetricRecord>,
    pub rates: BTreeMap<String, RateMetricRecord>,
}

/// What a single flush did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    pub value_records: usize,
    pub rate_records: usize,
    /// Records were handed to the sink.
    pub emitted: bool,
    /// Records were rendered to the log.
    pub logged: bool,
}

/// Swaps out the live aggregation maps on every tick and emits them.
///
/// Emission is gated by the `active` flag; logging by the `log` flag.
/// The swap happens regardless, so memory stays bounded to one window.
pub struct FlushCoordinator {
    values: Arc<ValueStore>,
    rates: Arc<RateStore>,
    sink: Option<Arc<dyn MetricSink>>,
    queues: Vec<Arc<SampleQueue>>,
    active: AtomicBool,
    log: AtomicBool,
    flushes: AtomicU64,
    reported_drops: Mutex<Vec<u64>>,
}

// ─── Snapshot impl ───────────────────────────────────────────────

impl Snapshot {
    /// Take both live maps. Each store is swapped under its own lock.
    pub fn take(values: &ValueStore, rates: &RateStore, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            values: values.take(timestamp),
            rates: rates.take(timestamp),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.rates.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.values.len() + self.rates.len()
    }
}

// ─── FlushCoordinator impl ───────────────────────────────────────

impl FlushCoordinator {
    pub fn new(
        values: Arc<ValueStore>,
        rates: Arc<RateStore>,
        sink: Option<Arc<dyn MetricSink>>,
    ) -> Self {
        Self {
            values,
            rates,
            sink,
            queues: Vec::new(),
            active: AtomicBool::new(false),
            log: AtomicBool::new(false),
            flushes: AtomicU64::new(0),
            reported_drops: Mutex::new(Vec::new()),
        }
    }

    /// Queues whose overflow is reported once per flush.
    pub fn with_queues(mut self, queues: Vec<Arc<SampleQueue>>) -> Self {
        *self.reported_drops.get_mut() = vec![0; queues.len()];
        self.queues = queues;
        self
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_log(&self, log: bool) {
        self.log.store(log, Ordering::Relaxed);
    }

    pub fn log_enabled(&self) -> bool {
        self.log.load(Ordering::Relaxed)
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Completed flushes since creation.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Swap, then emit and/or log outside of any aggregation lock.
    pub fn flush(&self) -> FlushReport {
        self.flush_at(Utc::now())
    }

    /// Like [`FlushCoordinator::flush`], stamping records with the given
    /// time. The scheduler passes the grid boundary it woke up for.
    pub fn flush_at(&self, timestamp: DateTime<Utc>) -> FlushReport {
        let snapshot = Snapshot::take(&self.values, &self.rates, timestamp);
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.report_drops();

        self.emit(&snapshot)
    }

    /// Deliver an already-taken snapshot according to the current flags.
    pub fn emit(&self, snapshot: &Snapshot) -> FlushReport {
        let mut report = FlushReport {
            value_records: snapshot.values.len(),
            rate_records: snapshot.rates.len(),
            ..FlushReport::default()
        };
        if snapshot.is_empty() {
            return report;
        }

        if self.log_enabled() {
            for record in snapshot.values.values() {
                info!("{record}");
            }
            for record in snapshot.rates.values() {
                info!("{record}");
            }
            report.logged = true;
        }

        match &self.sink {
            Some(sink) if self.is_active() => {
                for record in snapshot.values.values() {
                    sink.send_metric(record);
                }
                for record in snapshot.rates.values() {
                    sink.send_derived_metric(record);
                }
                report.emitted = true;
            }
            _ => {}
        }

        debug!(
            values = report.value_records,
            rates = report.rate_records,
            emitted = report.emitted,
            "flushed window"
        );
        report
    }

    fn report_drops(&self) {
        let mut reported = self.reported_drops.lock();
        for (queue, seen) in self.queues.iter().zip(reported.iter_mut()) {
            let total = queue.dropped();
            if total > *seen {
                warn!(
                    dropped = total - *seen,
                    capacity = queue.capacity(),
                    "sample queue overflowed, samples discarded"
                );
                *seen = total;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Sample;
    use crate::sink::MemorySink;

    fn setup() -> (Arc<ValueStore>, Arc<RateStore>, Arc<MemorySink>, FlushCoordinator) {
        let values = Arc::new(ValueStore::new());
        let rates = Arc::new(RateStore::new());
        let sink = Arc::new(MemorySink::new());
        let coordinator =
            FlushCoordinator::new(values.clone(), rates.clone(), Some(sink.clone()));
        (values, rates, sink, coordinator)
    }

    #[test]
    fn active_flush_emits_every_record() {
        let (values, rates, sink, coordinator) = setup();
        coordinator.set_active(true);
        values.record(Sample::new("cpu", "core0", 0.5));
        values.record(Sample::new("mem", "rss", 1.0));
        rates.record(Sample::new("net", "rx", 10.0));

        let report = coordinator.flush();
        assert_eq!(report.value_records, 2);
        assert_eq!(report.rate_records, 1);
        assert!(report.emitted);
        assert!(!report.logged);
        assert_eq!(sink.value_records().len(), 2);
        assert_eq!(sink.rate_records().len(), 1);
        assert_eq!(coordinator.flush_count(), 1);
    }

    #[test]
    fn empty_flush_is_idempotent() {
        let (values, _rates, sink, coordinator) = setup();
        coordinator.set_active(true);
        values.record(Sample::new("cpu", "core0", 0.5));
        coordinator.flush();
        assert_eq!(sink.len(), 1);

        let second = coordinator.flush();
        let third = coordinator.flush();
        assert_eq!(second, FlushReport::default());
        assert_eq!(third, FlushReport::default());
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn inactive_flush_discards_window() {
        let (values, rates, sink, coordinator) = setup();
        values.record(Sample::new("cpu", "core0", 0.5));
        rates.record(Sample::new("net", "rx", 10.0));

        let report = coordinator.flush();
        assert!(!report.emitted);
        assert_eq!(report.value_records, 1);
        assert!(sink.is_empty());
        assert!(values.is_empty());
        assert!(rates.is_empty());

        // Nothing from the discarded window shows up after activation.
        coordinator.set_active(true);
        values.record(Sample::new("cpu", "core0", 2.0));
        coordinator.flush();
        let emitted = sink.value_records();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].values_for("core0"), Some(&[2.0][..]));
    }

    #[test]
    fn log_only_without_sink() {
        let values = Arc::new(ValueStore::new());
        let rates = Arc::new(RateStore::new());
        let coordinator = FlushCoordinator::new(values.clone(), rates, None);
        coordinator.set_active(true);
        coordinator.set_log(true);
        values.record(Sample::new("cpu", "core0", 0.5));

        let report = coordinator.flush();
        assert!(report.logged);
        assert!(!report.emitted);
        assert!(!coordinator.has_sink());
    }

    #[test]
    fn flush_at_stamps_boundary() {
        let (values, rates, sink, coordinator) = setup();
        coordinator.set_active(true);
        values.record(Sample::new("cpu", "core0", 0.5));
        rates.record(Sample::new("net", "rx", 10.0));

        let boundary = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_500).unwrap();
        coordinator.flush_at(boundary);
        assert_eq!(sink.value_records()[0].timestamp, boundary);
        assert_eq!(sink.rate_records()[0].timestamp, boundary);
    }

    #[test]
    fn snapshot_carries_flush_timestamp() {
        let (values, rates, _sink, _coordinator) = setup();
        values.record(Sample::new("cpu", "core0", 0.5));
        rates.record(Sample::new("net", "rx", 10.0));

        let stamp = Utc::now();
        let snapshot = Snapshot::take(&values, &rates, stamp);
        assert_eq!(snapshot.record_count(), 2);
        assert_eq!(snapshot.values["cpu"].timestamp, stamp);
        assert_eq!(snapshot.rates["net"].timestamp, stamp);
    }
}
