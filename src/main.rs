use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use ddmon::{load_generator, Monitor, MonitoringOptions};

/// Producer threads started by the demo load generator.
const DEFAULT_WORKERS: u32 = 4;
/// How long the demo pushes samples (seconds).
const DEFAULT_DURATION_SECS: u64 = 10;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();

    println!();
    println!("╔══════════════════════════════════════════════════╗");
    println!("║   📈  DDMON — METRICS AGGREGATION PIPELINE       ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();

    // ── 1. Load options ──────────────────────────────────────────
    let mut options = MonitoringOptions::from_env().unwrap_or_else(|e| {
        eprintln!("❌ {e}");
        eprintln!("   DDMON_OPTIONS must be a JSON object, e.g.");
        eprintln!("   → DDMON_OPTIONS='{{\"backend\":\"stdout://\",\"interval_secs\":1.0}}'");
        std::process::exit(1);
    });
    if options.backend.is_empty() && !options.log {
        // Nothing would consume samples otherwise.
        options.log = true;
    }
    let workers = env_or("DDMON_WORKERS", DEFAULT_WORKERS);
    let duration = Duration::from_secs(env_or("DDMON_DURATION_SECS", DEFAULT_DURATION_SECS));

    // ── 2. Start the pipeline ────────────────────────────────────
    let monitor = match Monitor::from_options(options) {
        Ok(monitor) => Arc::new(monitor),
        Err(e) => {
            eprintln!("❌ Cannot start monitoring: {e}");
            std::process::exit(1);
        }
    };
    monitor.enable(1, "demo");

    // ── 3. Generate load ─────────────────────────────────────────
    println!("🔥 {workers} producers × {}s", duration.as_secs());
    let running = Arc::new(AtomicBool::new(true));
    let mut generator = {
        let (running, monitor) = (running.clone(), monitor.clone());
        tokio::task::spawn_blocking(move || load_generator::run(running, monitor, workers, duration))
    };

    let finished = tokio::select! {
        result = &mut generator => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            println!("⏹  Interrupted, stopping producers...");
            running.store(false, Ordering::SeqCst);
            generator.await
        }
    };
    let pushes = result.unwrap_or_else(|e| {
        eprintln!("❌ Load generator failed: {e}");
        0
    });

    // ── 4. Shut down ─────────────────────────────────────────────
    if let Err(e) = monitor.shutdown().await {
        eprintln!("❌ {e}");
    }

    println!();
    println!("   ✓ {pushes} push calls");
    match serde_json::to_string_pretty(&monitor.stats()) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("❌ Cannot render stats: {e}"),
    }
}
