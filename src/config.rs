use serde::Deserialize;

use crate::error::ConfigError;
use crate::metrics::queue::DEFAULT_QUEUE_CAPACITY;

/// Environment variable holding the options as a JSON object.
pub const OPTIONS_ENV: &str = "DDMON_OPTIONS";

// ─── Options ─────────────────────────────────────────────────────

/// Monitoring options handed to the pipeline by its owner.
///
/// Every field has a default, so `{}` is a valid (collection disabled)
/// configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitoringOptions {
    /// Backend URI. Empty means no sink is attached.
    #[serde(default)]
    pub backend: String,

    /// Flush interval in seconds. Values at or below `f32::EPSILON`
    /// disable emission.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f32,

    /// Render every flushed record through the log.
    #[serde(default)]
    pub log: bool,

    /// Process (CPU / memory) monitoring interval in seconds.
    /// Negative = disabled, 0 = reuse the main interval.
    #[serde(default = "default_process_interval_secs")]
    pub process_interval_secs: i32,

    /// Attached to the sink as the `subsystem` global tag.
    #[serde(default = "default_subsystem")]
    pub subsystem: String,

    /// Capacity of each of the two sample queues.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_interval_secs() -> f32 {
    2.0
}
fn default_process_interval_secs() -> i32 {
    -1
}
fn default_subsystem() -> String {
    "datadist".into()
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for MonitoringOptions {
    fn default() -> Self {
        Self {
            backend: String::new(),
            interval_secs: default_interval_secs(),
            log: false,
            process_interval_secs: default_process_interval_secs(),
            subsystem: default_subsystem(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl MonitoringOptions {
    /// Parse and validate options from a JSON object.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Read options from `DDMON_OPTIONS`, falling back to defaults when
    /// the variable is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(OPTIONS_ENV) {
            Ok(json) => Self::from_json(&json),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if !self.interval_secs.is_finite() {
            return Err(ConfigError::NonFiniteInterval(self.interval_secs));
        }
        Ok(())
    }

    /// Flush interval in whole milliseconds, or `None` when emission is
    /// disabled by a (near) zero interval.
    pub fn interval_ms(&self) -> Option<u64> {
        interval_secs_to_ms(self.interval_secs)
    }

    /// Process monitoring period in seconds, or `None` when disabled.
    pub fn process_monitoring(&self) -> Option<u32> {
        match self.process_interval_secs {
            n if n < 0 => None,
            0 => self
                .interval_ms()
                .map(|ms| ms.div_ceil(1000).clamp(1, u32::MAX as u64) as u32),
            n => Some(n as u32),
        }
    }
}

/// Seconds → milliseconds with rounding; `None` at or below epsilon.
pub fn interval_secs_to_ms(secs: f32) -> Option<u64> {
    if !secs.is_finite() || secs <= f32::EPSILON {
        return None;
    }
    Some((f64::from(secs) * 1000.0).round() as u64)
}
