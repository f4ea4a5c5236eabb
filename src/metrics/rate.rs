use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use super::queue::SampleReceiver;
use super::Sample;

// ─── Public types ────────────────────────────────────────────────

/// Running statistics for one key. No raw values are retained.
///
/// The mean is reported as `sum / count`; the sum is the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateStats {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub count: u64,
}

/// Statistics for every key of one metric name during a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateMetricRecord {
    pub metric_name: String,
    pub stats: BTreeMap<String, RateStats>,
    /// Set when the record is swapped out at flush.
    pub timestamp: DateTime<Utc>,
    /// Length of the window these statistics cover.
    pub window: Duration,
}

/// Live rate map plus the instant the current window opened.
pub struct RateStore {
    inner: Mutex<RateWindow>,
    recorded: AtomicU64,
}

struct RateWindow {
    metrics: BTreeMap<String, RateMetricRecord>,
    opened: Instant,
}

/// Drains the rate queue into a [`RateStore`].
pub struct RateAggregator {
    store: Arc<RateStore>,
}

// ─── RateStats impl ──────────────────────────────────────────────

impl RateStats {
    pub fn observe(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
    }

    /// Arithmetic mean of every observed value, `None` before the first.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Observations per second over `window`.
    pub fn rate_per_sec(&self, window: Duration) -> Option<f64> {
        let secs = window.as_secs_f64();
        (secs > 0.0).then(|| self.count as f64 / secs)
    }
}

impl Default for RateStats {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            count: 0,
        }
    }
}

// ─── RateMetricRecord impl ───────────────────────────────────────

impl RateMetricRecord {
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            metric_name: metric_name.into(),
            stats: BTreeMap::new(),
            timestamp: Utc::now(),
            window: Duration::ZERO,
        }
    }

    pub fn observe(&mut self, key: String, value: f64) {
        self.stats.entry(key).or_default().observe(value);
    }

    pub fn stats_for(&self, key: &str) -> Option<&RateStats> {
        self.stats.get(key)
    }
}

impl fmt::Display for RateMetricRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} ({:.3}s) {{",
            self.metric_name,
            self.timestamp.format("%H:%M:%S%.3f"),
            self.window.as_secs_f64()
        )?;
        for (i, (key, s)) in self.stats.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(
                f,
                " {key}: min={} max={} mean={} count={}",
                s.min,
                s.max,
                s.mean().unwrap_or(0.0),
                s.count
            )?;
            if let Some(rate) = s.rate_per_sec(self.window) {
                write!(f, " rate={rate:.2}/s")?;
            }
        }
        write!(f, " }}")
    }
}

// ─── RateStore impl ──────────────────────────────────────────────

impl RateStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RateWindow {
                metrics: BTreeMap::new(),
                opened: Instant::now(),
            }),
            recorded: AtomicU64::new(0),
        }
    }

    /// Fold one sample into the statistics of its `(name, key)`.
    pub fn record(&self, sample: Sample) {
        let Sample {
            metric_name,
            key,
            value,
        } = sample;

        let mut window = self.inner.lock();
        match window.metrics.get_mut(&metric_name) {
            Some(record) => record.observe(key, value),
            None => {
                let mut record = RateMetricRecord::new(metric_name.clone());
                record.observe(key, value);
                window.metrics.insert(metric_name, record);
            }
        }
        self.recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Swap the live map for an empty one and open a new window.
    pub fn take(&self, timestamp: DateTime<Utc>) -> BTreeMap<String, RateMetricRecord> {
        let now = Instant::now();
        let (mut taken, opened) = {
            let mut window = self.inner.lock();
            let opened = std::mem::replace(&mut window.opened, now);
            (std::mem::take(&mut window.metrics), opened)
        };

        let length = now.saturating_duration_since(opened);
        for record in taken.values_mut() {
            record.timestamp = timestamp;
            record.window = length;
        }
        taken
    }

    /// Samples folded in since creation, across all windows.
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().metrics.is_empty()
    }
}

impl Default for RateStore {
    fn default() -> Self {
        Self::new()
    }
}

// ─── RateAggregator impl ─────────────────────────────────────────

impl RateAggregator {
    pub fn new(store: Arc<RateStore>) -> Self {
        Self { store }
    }

    /// Consume until the queue is closed and empty.
    pub async fn run(self, mut rx: SampleReceiver) {
        let mut consumed: u64 = 0;
        while let Some(sample) = rx.pop().await {
            self.store.record(sample);
            consumed += 1;
        }
        tracing::debug!(consumed, "rate aggregator stopped");
    }
}
