//! Logging initialization.
//!
//! Wires `tracing-subscriber` with an `EnvFilter` so `RUST_LOG` always wins,
//! falling back to the level configured in `Config.logging`. Format is
//! selectable (`text`/`json`) the same way the teacher's `LoggingConfig`
//! does, since the host application (out of scope for this crate) may want
//! structured logs in production and text logs in local development.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber. Safe to call once per process;
/// a second call is a no-op (the underlying `try_init` swallows the error).
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = if config.format == "json" {
        fmt().with_env_filter(filter).json().try_init()
    } else {
        fmt().with_env_filter(filter).try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already initialized");
    }
}
