use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use super::queue::SampleReceiver;
use super::Sample;

// ─── Public types ────────────────────────────────────────────────

/// Every value observed for one metric name during a window, per key,
/// in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueMetricRecord {
    pub metric_name: String,
    pub values: BTreeMap<String, Vec<f64>>,
    /// Set when the record is swapped out at flush.
    pub timestamp: DateTime<Utc>,
}

/// Live value map shared between the value aggregator and the flush
/// coordinator. The lock is held for one append or one swap, never longer.
pub struct ValueStore {
    inner: Mutex<BTreeMap<String, ValueMetricRecord>>,
    recorded: AtomicU64,
}

/// Drains the value queue into a [`ValueStore`].
pub struct ValueAggregator {
    store: Arc<ValueStore>,
}

// ─── ValueMetricRecord impl ──────────────────────────────────────

impl ValueMetricRecord {
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            metric_name: metric_name.into(),
            values: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn observe(&mut self, key: String, value: f64) {
        self.values.entry(key).or_default().push(value);
    }

    pub fn values_for(&self, key: &str) -> Option<&[f64]> {
        self.values.get(key).map(Vec::as_slice)
    }

    /// Number of observations across all keys.
    pub fn observation_count(&self) -> usize {
        self.values.values().map(Vec::len).sum()
    }

    /// Arithmetic mean of one key's observations.
    pub fn mean_for(&self, key: &str) -> Option<f64> {
        let values = self.values.get(key)?;
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

impl fmt::Display for ValueMetricRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {} {{", self.metric_name, self.timestamp.format("%H:%M:%S%.3f"))?;
        for (i, (key, values)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {key}={values:?}")?;
        }
        write!(f, " }}")
    }
}

// ─── ValueStore impl ─────────────────────────────────────────────

impl ValueStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
            recorded: AtomicU64::new(0),
        }
    }

    /// Append one sample, creating the record and key on first sight.
    pub fn record(&self, sample: Sample) {
        let Sample {
            metric_name,
            key,
            value,
        } = sample;

        let mut map = self.inner.lock();
        match map.get_mut(&metric_name) {
            Some(record) => record.observe(key, value),
            None => {
                let mut record = ValueMetricRecord::new(metric_name.clone());
                record.observe(key, value);
                map.insert(metric_name, record);
            }
        }
        self.recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Swap the live map for an empty one and stamp the taken records.
    pub fn take(&self, timestamp: DateTime<Utc>) -> BTreeMap<String, ValueMetricRecord> {
        let mut taken = std::mem::take(&mut *self.inner.lock());
        for record in taken.values_mut() {
            record.timestamp = timestamp;
        }
        taken
    }

    /// Samples folded in since creation, across all windows.
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    /// Number of distinct metric names in the current window.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for ValueStore {
    fn default() -> Self {
        Self::new()
    }
}

// ─── ValueAggregator impl ────────────────────────────────────────

impl ValueAggregator {
    pub fn new(store: Arc<ValueStore>) -> Self {
        Self { store }
    }

    /// Consume until the queue is closed and empty.
    pub async fn run(self, mut rx: SampleReceiver) {
        let mut consumed: u64 = 0;
        while let Some(sample) = rx.pop().await {
            self.store.record(sample);
            consumed += 1;
        }
        tracing::debug!(consumed, "value aggregator stopped");
    }
}
