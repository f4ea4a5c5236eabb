use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::monitor::Monitor;

// ─── Configuration ───────────────────────────────────────────────

/// Keys each worker reports under, e.g. "buffer" / "worker3".
const VALUE_METRICS: &[&str] = &["buffer_fill", "queue_depth"];
const RATE_METRICS: &[&str] = &["stf_size", "send_latency_us"];

/// Pause between iterations so the demo does not saturate the queues.
const ITERATION_PAUSE: Duration = Duration::from_micros(200);

// ─── Public entry point ──────────────────────────────────────────

/// Spawns `workers` producer threads that push synthetic samples until
/// the deadline or the `running` flag is cleared. Returns the number of
/// push calls made (accepted or not).
pub fn run(
    running: Arc<AtomicBool>,
    monitor: Arc<Monitor>,
    workers: u32,
    duration: Duration,
) -> u64 {
    let deadline = Instant::now() + duration;

    let handles: Vec<_> = (0..workers)
        .map(|worker_id| {
            let running = running.clone();
            let monitor = monitor.clone();
            thread::Builder::new()
                .name(format!("producer-{worker_id}"))
                .spawn(move || worker(worker_id, running, monitor, deadline))
        })
        .filter_map(|spawned| match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "failed to spawn producer thread");
                None
            }
        })
        .collect();

    // Wait for all workers to finish
    let pushes = handles
        .into_iter()
        .map(|h| h.join().unwrap_or(0))
        .sum();

    running.store(false, Ordering::SeqCst);
    pushes
}

// ─── Worker loop ─────────────────────────────────────────────────

fn worker(id: u32, running: Arc<AtomicBool>, monitor: Arc<Monitor>, deadline: Instant) -> u64 {
    // Each worker gets its own deterministic RNG seeded uniquely.
    let mut rng = StdRng::seed_from_u64(1000 + id as u64);
    let key = format!("worker{id}");
    let mut pushes = 0u64;

    while running.load(Ordering::Relaxed) && Instant::now() < deadline {
        if rng.gen_bool(0.5) {
            let name = VALUE_METRICS[rng.gen_range(0..VALUE_METRICS.len())];
            monitor.push(name, &key, rng.gen_range(0.0..1.0));
        } else {
            let name = RATE_METRICS[rng.gen_range(0..RATE_METRICS.len())];
            monitor.push_rate(name, &key, rng.gen_range(1.0..1000.0));
        }
        pushes += 1;
        thread::sleep(ITERATION_PAUSE);
    }
    pushes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitoringOptions;
    use crate::sink::MemorySink;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn producers_stop_at_deadline() {
        let sink = Arc::new(MemorySink::new());
        let monitor = Arc::new(Monitor::start(MonitoringOptions::default(), Some(sink)).unwrap());
        let running = Arc::new(AtomicBool::new(true));

        let pushes = {
            let (running, monitor) = (running.clone(), monitor.clone());
            tokio::task::spawn_blocking(move || {
                run(running, monitor, 3, Duration::from_millis(100))
            })
            .await
            .unwrap()
        };

        assert!(pushes > 0);
        assert!(!running.load(Ordering::SeqCst));
        let stats = monitor.stats();
        assert_eq!(
            stats.value_accepted + stats.value_dropped + stats.rate_accepted + stats.rate_dropped,
            pushes
        );
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cleared_flag_still_reports_pushes() {
        let sink = Arc::new(MemorySink::new());
        let monitor = Arc::new(Monitor::start(MonitoringOptions::default(), Some(sink)).unwrap());
        let running = Arc::new(AtomicBool::new(true));

        let generator = {
            let (running, monitor) = (running.clone(), monitor.clone());
            tokio::task::spawn_blocking(move || run(running, monitor, 2, Duration::from_secs(60)))
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        running.store(false, Ordering::SeqCst);

        let pushes = tokio::time::timeout(Duration::from_secs(5), generator)
            .await
            .expect("producers ignored the running flag")
            .unwrap();
        assert!(pushes > 0);
        let stats = monitor.stats();
        assert_eq!(
            stats.value_accepted + stats.value_dropped + stats.rate_accepted + stats.rate_dropped,
            pushes
        );
        monitor.shutdown().await.unwrap();
    }
}
