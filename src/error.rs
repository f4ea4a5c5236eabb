use thiserror::Error;

// ─── Error taxonomy ──────────────────────────────────────────────
//
// None of these ever reach an instrumented call site: `push` and
// `push_rate` swallow overflow and shutdown races. Errors only come out
// of option loading, sink selection and the monitor lifecycle.

/// Invalid monitoring options.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("queue_capacity must be at least 1")]
    ZeroCapacity,

    #[error("interval_secs must be a finite number, got {0}")]
    NonFiniteInterval(f32),

    #[error("invalid monitoring options: {0}")]
    Json(#[from] serde_json::Error),
}

/// The configured backend cannot be turned into a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("unsupported monitoring backend \"{0}\"")]
    UnsupportedBackend(String),

    #[error("malformed monitoring backend \"{0}\", expected scheme://[target]")]
    MalformedBackend(String),
}

/// Lifecycle failures of the monitor itself.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("monitor must be started from inside a tokio runtime")]
    NoRuntime,

    #[error("monitor has already been shut down")]
    ShutDown,
}
