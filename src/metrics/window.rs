use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::flush::FlushCoordinator;

// ─── Configuration ───────────────────────────────────────────────

/// Finest alignment grid, used for short intervals.
const MIN_STEP_MS: u64 = 250;

/// Grid coarsens by this much for every full `STEP_INTERVAL_MS` of interval.
const STEP_INCREMENT_MS: u64 = 500;
const STEP_INTERVAL_MS: u64 = 2000;

/// Interval used until `set_interval` is called.
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

// ─── Grid arithmetic ─────────────────────────────────────────────

/// Alignment step for a flush interval:
/// `max(250ms, 500ms * floor(interval_ms / 2000))`.
pub fn step_for_interval(interval_ms: u64) -> Duration {
    let step = STEP_INCREMENT_MS * (interval_ms / STEP_INTERVAL_MS);
    Duration::from_millis(step.max(MIN_STEP_MS))
}

/// Smallest multiple of `step` that is `>= t`, at microsecond resolution.
pub fn next_boundary(t: Duration, step: Duration) -> Duration {
    let step_us = step.as_micros().max(1);
    let steps = t.as_micros().div_ceil(step_us);
    let boundary_us = steps.saturating_mul(step_us).min(u64::MAX as u128);
    Duration::from_micros(boundary_us as u64)
}

// ─── WindowTiming ────────────────────────────────────────────────

/// Runtime-adjustable flush interval shared by the monitor handle and
/// the scheduler task.
pub struct WindowTiming {
    interval_ms: AtomicU64,
    replan: Notify,
}

impl WindowTiming {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms: AtomicU64::new(interval_ms.max(1)),
            replan: Notify::new(),
        }
    }

    /// Change the interval and wake the scheduler so it re-plans its
    /// next boundary right away.
    pub fn set_interval(&self, interval_ms: u64) {
        self.interval_ms.store(interval_ms.max(1), Ordering::Relaxed);
        self.replan.notify_one();
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    pub fn step(&self) -> Duration {
        step_for_interval(self.interval_ms.load(Ordering::Relaxed))
    }

    /// Wall-clock time of the next flush, rounded up onto the absolute
    /// step grid.
    ///
    /// With a `previous` boundary the next one is planned one interval
    /// after it, not after the (always slightly late) wake-up time. Without
    /// one, or when the clock has already passed that point, planning
    /// starts from `now`.
    pub fn next_flush(&self, now: SystemTime, previous: Option<SystemTime>) -> SystemTime {
        let now = since_epoch(now);
        let earliest = match previous {
            Some(previous) => (since_epoch(previous) + self.interval()).max(now),
            None => now + self.interval(),
        };
        UNIX_EPOCH + next_boundary(earliest, self.step())
    }
}

fn since_epoch(t: SystemTime) -> Duration {
    t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO)
}

impl Default for WindowTiming {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL_MS)
    }
}

// ─── WindowScheduler ─────────────────────────────────────────────

/// Sleeps until each grid-aligned boundary and triggers a flush.
///
/// Every wake recomputes the next boundary from the wall clock and the
/// boundary just reached, so the schedule keeps the configured interval
/// and never drifts off the grid.
pub struct WindowScheduler {
    timing: Arc<WindowTiming>,
    cancel: CancellationToken,
}

impl WindowScheduler {
    pub fn new(timing: Arc<WindowTiming>, cancel: CancellationToken) -> Self {
        Self { timing, cancel }
    }

    /// Run until cancelled. Cancellation skips the pending flush.
    ///
    /// Sink I/O runs on the blocking pool so a slow sink never stalls a
    /// runtime worker. Flushes are awaited one at a time.
    pub async fn run(self, coordinator: Arc<FlushCoordinator>) {
        let mut previous: Option<SystemTime> = None;
        loop {
            let now = SystemTime::now();
            let deadline = self.timing.next_flush(now, previous);
            let wait = deadline.duration_since(now).unwrap_or(Duration::ZERO);
            trace!(?wait, "next flush scheduled");

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.timing.replan.notified() => continue,
                _ = tokio::time::sleep(wait) => {
                    previous = Some(deadline);
                    let coordinator = coordinator.clone();
                    let flushed = tokio::task::spawn_blocking(move || {
                        coordinator.flush_at(DateTime::<Utc>::from(deadline))
                    })
                    .await;
                    if let Err(e) = flushed {
                        warn!(error = %e, "flush task failed");
                    }
                }
            }
        }
        debug!("window scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn step_coarsens_with_interval() {
        assert_eq!(step_for_interval(0), ms(250));
        assert_eq!(step_for_interval(1000), ms(250));
        assert_eq!(step_for_interval(1999), ms(250));
        assert_eq!(step_for_interval(2000), ms(500));
        assert_eq!(step_for_interval(3999), ms(500));
        assert_eq!(step_for_interval(4000), ms(1000));
        assert_eq!(step_for_interval(10_000), ms(2500));
    }

    #[test]
    fn boundary_rounds_up_to_step() {
        assert_eq!(next_boundary(ms(1000), ms(500)), ms(1000));
        assert_eq!(next_boundary(ms(1001), ms(500)), ms(1500));
        assert_eq!(next_boundary(ms(0), ms(500)), ms(0));
        assert_eq!(next_boundary(Duration::from_micros(1), ms(250)), ms(250));
    }

    #[test]
    fn boundary_is_monotonic_multiple_of_step() {
        let step = ms(500);
        let mut previous = Duration::ZERO;
        for t_us in (0..5_000_000u64).step_by(7_919) {
            let b = next_boundary(Duration::from_micros(t_us), step);
            assert!(b >= previous);
            assert!(b >= Duration::from_micros(t_us));
            assert_eq!(b.as_micros() % step.as_micros(), 0);
            previous = b;
        }
    }

    #[test]
    fn first_flush_lands_on_grid_one_interval_ahead() {
        let timing = WindowTiming::new(2000);
        let next = timing.next_flush(UNIX_EPOCH + ms(10_100), None);
        assert_eq!(next, UNIX_EPOCH + ms(12_500));

        // Two instances that started at different times share the grid.
        let other = timing.next_flush(UNIX_EPOCH + ms(10_350), None);
        assert_eq!(other, UNIX_EPOCH + ms(12_500));
    }

    #[test]
    fn late_wake_keeps_interval_cadence() {
        let timing = WindowTiming::new(2000);
        let boundary = UNIX_EPOCH + ms(12_500);
        let woke = boundary + Duration::from_micros(1);
        assert_eq!(timing.next_flush(woke, Some(boundary)), UNIX_EPOCH + ms(14_500));

        let fast = WindowTiming::new(500);
        let boundary = UNIX_EPOCH + ms(24_000);
        let woke = boundary + ms(3);
        assert_eq!(fast.next_flush(woke, Some(boundary)), UNIX_EPOCH + ms(24_500));
    }

    #[test]
    fn overdue_flush_catches_up_on_grid() {
        let timing = WindowTiming::new(2000);
        let boundary = UNIX_EPOCH + ms(12_500);
        // Woke up long after the next boundary should have fired.
        let woke = UNIX_EPOCH + ms(15_100);
        assert_eq!(timing.next_flush(woke, Some(boundary)), UNIX_EPOCH + ms(15_500));
    }

    #[test]
    fn short_interval_never_plans_in_the_past() {
        let timing = WindowTiming::new(100);
        let boundary = UNIX_EPOCH + ms(1_000);
        let next = timing.next_flush(boundary + ms(1), Some(boundary));
        assert_eq!(next, UNIX_EPOCH + ms(1_250));
    }

    #[test]
    fn set_interval_changes_step() {
        let timing = WindowTiming::default();
        assert_eq!(timing.step(), ms(250));
        timing.set_interval(6000);
        assert_eq!(timing.interval(), ms(6000));
        assert_eq!(timing.step(), ms(1500));
    }
}
