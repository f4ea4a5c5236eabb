use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{interval_secs_to_ms, MonitoringOptions};
use crate::error::MonitorError;
use crate::metrics::window::DEFAULT_INTERVAL_MS;
use crate::metrics::{
    FlushCoordinator, FlushReport, RateAggregator, RateStore, Sample, SampleQueue,
    ValueAggregator, ValueStore, WindowScheduler, WindowTiming,
};
use crate::sink::{self, MetricSink};

// ─── Public types ────────────────────────────────────────────────

/// Process-wide monitor lifecycle.
///
/// `Active` and `Inactive` may alternate any number of times;
/// `ShuttingDown` is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorState {
    /// Null monitor: nothing is collected.
    Uninitialized,
    /// Workers running, emission not yet enabled.
    Configured,
    Active,
    /// Still aggregating, windows are discarded instead of emitted.
    Inactive,
    ShuttingDown,
    Stopped,
}

/// Counters for the whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MonitorStats {
    pub value_accepted: u64,
    pub value_dropped: u64,
    pub rate_accepted: u64,
    pub rate_dropped: u64,
    /// Samples the aggregators have folded into a window.
    pub value_aggregated: u64,
    pub rate_aggregated: u64,
    pub flushes: u64,
}

/// Owned handle to the aggregation pipeline.
///
/// Share it with call sites through an `Arc<Monitor>`. `push` and
/// `push_rate` never block and never fail.
pub struct Monitor {
    value_queue: Arc<SampleQueue>,
    rate_queue: Arc<SampleQueue>,
    values: Arc<ValueStore>,
    rates: Arc<RateStore>,
    coordinator: Arc<FlushCoordinator>,
    timing: Arc<WindowTiming>,
    sink: Option<Arc<dyn MetricSink>>,
    /// Cleared by a zero interval; `set_active(true)` is ignored meanwhile.
    emission_allowed: AtomicBool,
    state: Mutex<MonitorState>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

// ─── Construction ────────────────────────────────────────────────

impl Monitor {
    /// Build the sink from `options.backend` and start the pipeline.
    ///
    /// An unusable backend is not fatal: the monitor runs without a sink.
    pub fn from_options(options: MonitoringOptions) -> Result<Self, MonitorError> {
        let sink = match sink::from_backend(&options.backend) {
            Ok(sink) => sink,
            Err(e) => {
                warn!(error = %e, "monitoring sink unavailable, metrics will not be sent");
                None
            }
        };
        Self::start(options, sink)
    }

    /// Start the two aggregators and the window scheduler on the current
    /// tokio runtime. The monitor comes up `Configured` (not emitting).
    pub fn start(
        options: MonitoringOptions,
        sink: Option<Arc<dyn MetricSink>>,
    ) -> Result<Self, MonitorError> {
        options.validate()?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;

        let monitor = Self::assemble(&options, sink, MonitorState::Configured);

        if let Some(sink) = &monitor.sink {
            sink.add_global_tag("subsystem", &options.subsystem);
            if let Some(secs) = options.process_monitoring() {
                sink.enable_process_monitoring(Some(secs));
            }
        }

        {
            let mut workers = monitor.workers.lock();
            if let Some(rx) = monitor.value_queue.take_receiver() {
                let aggregator = ValueAggregator::new(monitor.values.clone());
                workers.push(runtime.spawn(aggregator.run(rx)));
            }
            if let Some(rx) = monitor.rate_queue.take_receiver() {
                let aggregator = RateAggregator::new(monitor.rates.clone());
                workers.push(runtime.spawn(aggregator.run(rx)));
            }
            let scheduler = WindowScheduler::new(monitor.timing.clone(), monitor.cancel.clone());
            workers.push(runtime.spawn(scheduler.run(monitor.coordinator.clone())));
        }

        info!(
            backend = %options.backend,
            interval_ms = monitor.timing.interval().as_millis() as u64,
            step_ms = monitor.timing.step().as_millis() as u64,
            log = options.log,
            queue_capacity = options.queue_capacity,
            "monitoring pipeline started"
        );
        Ok(monitor)
    }

    /// Null monitor: every call is a cheap no-op and no task is spawned.
    pub fn disabled() -> Self {
        let monitor = Self::assemble(
            &MonitoringOptions::default(),
            None,
            MonitorState::Uninitialized,
        );
        monitor.value_queue.close();
        monitor.rate_queue.close();
        monitor
    }

    /// Wire queues, stores and coordinator together. No task is spawned.
    fn assemble(
        options: &MonitoringOptions,
        sink: Option<Arc<dyn MetricSink>>,
        state: MonitorState,
    ) -> Self {
        let interval_ms = options.interval_ms();
        let value_queue = Arc::new(SampleQueue::new(options.queue_capacity));
        let rate_queue = Arc::new(SampleQueue::new(options.queue_capacity));
        let values = Arc::new(ValueStore::new());
        let rates = Arc::new(RateStore::new());

        let coordinator = FlushCoordinator::new(values.clone(), rates.clone(), sink.clone())
            .with_queues(vec![value_queue.clone(), rate_queue.clone()]);
        coordinator.set_log(options.log);

        Self {
            value_queue,
            rate_queue,
            values,
            rates,
            coordinator: Arc::new(coordinator),
            timing: Arc::new(WindowTiming::new(interval_ms.unwrap_or(DEFAULT_INTERVAL_MS))),
            sink,
            emission_allowed: AtomicBool::new(interval_ms.is_some()),
            state: Mutex::new(state),
            cancel: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }
}

// ─── Hot path ────────────────────────────────────────────────────

impl Monitor {
    /// Samples are only worth queueing when something will consume them.
    #[inline]
    fn collecting(&self) -> bool {
        self.sink.is_some() || self.coordinator.log_enabled()
    }

    /// Fire-and-forget value sample.
    #[inline]
    pub fn push(&self, metric_name: &str, key: &str, value: f64) {
        if self.collecting() {
            self.value_queue.push(Sample::new(metric_name, key, value));
        }
    }

    /// Fire-and-forget rate sample.
    #[inline]
    pub fn push_rate(&self, metric_name: &str, key: &str, value: f64) {
        if self.collecting() {
            self.rate_queue.push(Sample::new(metric_name, key, value));
        }
    }
}

// ─── Runtime control ─────────────────────────────────────────────

impl Monitor {
    pub fn set_active(&self, active: bool) {
        let mut state = self.state.lock();
        if !matches!(
            *state,
            MonitorState::Configured | MonitorState::Active | MonitorState::Inactive
        ) {
            return;
        }

        let active = active && self.emission_allowed.load(Ordering::Relaxed);
        self.coordinator.set_active(active);
        *state = match (*state, active) {
            (_, true) => MonitorState::Active,
            (MonitorState::Configured, false) => MonitorState::Configured,
            (_, false) => MonitorState::Inactive,
        };
    }

    /// Change the flush interval. Zero disables emission.
    pub fn set_interval(&self, interval_ms: u64) {
        if interval_ms == 0 {
            self.emission_allowed.store(false, Ordering::Relaxed);
            self.set_active(false);
            return;
        }
        self.emission_allowed.store(true, Ordering::Relaxed);
        self.timing.set_interval(interval_ms);
    }

    /// Seconds variant of [`Monitor::set_interval`]; anything at or below
    /// `f32::EPSILON` disables emission.
    pub fn apply_interval_secs(&self, interval_secs: f32) {
        self.set_interval(interval_secs_to_ms(interval_secs).unwrap_or(0));
    }

    pub fn set_log(&self, log: bool) {
        self.coordinator.set_log(log);
    }

    pub fn set_run_number(&self, run_number: u32) {
        if let Some(sink) = &self.sink {
            sink.set_run_number(run_number);
        }
    }

    pub fn set_partition_id(&self, partition_id: &str) {
        self.add_global_tag("partition", partition_id);
    }

    pub fn add_global_tag(&self, key: &str, value: &str) {
        if let Some(sink) = &self.sink {
            sink.add_global_tag(key, value);
        }
    }

    pub fn enable_process_monitoring(&self, interval_secs: Option<u32>) {
        if let Some(sink) = &self.sink {
            sink.enable_process_monitoring(interval_secs);
        }
    }

    /// Tag the run and start emitting. Run number 0 is bumped to 1.
    pub fn enable(&self, run_number: u32, partition_id: &str) {
        self.set_run_number(run_number.max(1));
        self.set_partition_id(partition_id);
        self.set_active(true);
    }

    /// Flush immediately instead of waiting for the next boundary.
    pub fn flush_now(&self) -> FlushReport {
        self.coordinator.flush()
    }
}

// ─── Introspection ───────────────────────────────────────────────

impl Monitor {
    pub fn state(&self) -> MonitorState {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.coordinator.is_active()
    }

    pub fn interval(&self) -> Duration {
        self.timing.interval()
    }

    pub fn step(&self) -> Duration {
        self.timing.step()
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            value_accepted: self.value_queue.accepted(),
            value_dropped: self.value_queue.dropped(),
            rate_accepted: self.rate_queue.accepted(),
            rate_dropped: self.rate_queue.dropped(),
            value_aggregated: self.values.recorded(),
            rate_aggregated: self.rates.recorded(),
            flushes: self.coordinator.flush_count(),
        }
    }
}

// ─── Shutdown ────────────────────────────────────────────────────

impl Monitor {
    /// Close both queues, let the aggregators drain, stop the scheduler
    /// and wait for all three. The in-flight window is discarded.
    pub async fn shutdown(&self) -> Result<(), MonitorError> {
        {
            let mut state = self.state.lock();
            if matches!(*state, MonitorState::ShuttingDown | MonitorState::Stopped) {
                return Err(MonitorError::ShutDown);
            }
            *state = MonitorState::ShuttingDown;
        }

        self.coordinator.set_active(false);
        self.value_queue.close();
        self.rate_queue.close();
        self.cancel.cancel();

        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "monitoring worker failed");
            }
        }

        *self.state.lock() = MonitorState::Stopped;
        info!(stats = ?self.stats(), "monitoring pipeline stopped");
        Ok(())
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.value_queue.close();
        self.rate_queue.close();
        self.cancel.cancel();
    }
}
