#![allow(dead_code)]

use std::time::{Duration, Instant};

use ddmon::{MemorySink, RateStats};

/// Poll `cond` every 10 ms until it holds or `timeout` expires.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Every value emitted for `(name, key)`, concatenated across windows.
pub fn emitted_values(sink: &MemorySink, name: &str, key: &str) -> Vec<f64> {
    sink.value_records()
        .iter()
        .filter(|r| r.metric_name == name)
        .filter_map(|r| r.values_for(key))
        .flat_map(|v| v.iter().copied())
        .collect()
}

/// Every rate window emitted for `(name, key)`.
pub fn emitted_stats(sink: &MemorySink, name: &str, key: &str) -> Vec<RateStats> {
    sink.rate_records()
        .iter()
        .filter(|r| r.metric_name == name)
        .filter_map(|r| r.stats_for(key).copied())
        .collect()
}
