//! Logging utilities for TableDB
//!
//! Library code only emits `tracing` events. A subscriber is installed when
//! the `logging` feature is on and either the host calls one of these
//! helpers or [`EngineConfig::log_level`](crate::config::EngineConfig) is
//! set. Without the feature every helper is a no-op.
//!
//! Several engines may open in one process (tests, sync peers); the first
//! subscriber wins and later calls return `false`.

#[cfg(feature = "logging")]
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is unset: `level` for this crate, `warn`
/// for everything else.
pub fn default_filter(level: &str) -> String {
    format!("warn,tabledb_core={}", level)
}

/// Initialize logging at `info`
///
/// # Environment Variables
/// - `RUST_LOG` - Log level filter (default: "warn,tabledb_core=info")
///
/// # Example
/// ```rust
/// tabledb_core::logging::init();
/// ```
pub fn init() -> bool {
    init_with_level("info")
}

/// Initialize logging with a specific level for engine events
///
/// Returns whether this call installed the subscriber.
#[cfg(feature = "logging")]
pub fn init_with_level(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .try_init()
        .is_ok()
}

/// 테스트용 로깅 초기화
///
/// Debug level, routed through the test writer so output is captured per test.
#[cfg(feature = "logging")]
pub fn init_test() -> bool {
    fmt()
        .with_env_filter(EnvFilter::new(default_filter("debug")))
        .with_test_writer()
        .try_init()
        .is_ok()
}

#[cfg(not(feature = "logging"))]
pub fn init_with_level(_level: &str) -> bool {
    false
}

#[cfg(not(feature = "logging"))]
pub fn init_test() -> bool {
    false
}
