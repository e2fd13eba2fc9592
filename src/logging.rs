//! Subscriber setup for applications that want lifecycle logs on stderr.
//!
//! Logging is controlled by environment variables:
//!
//! - `MONGO_LIFECYCLE_DEBUG=true|1|yes` - enable debug logging
//! - `MONGO_LIFECYCLE_LOG_LEVEL=trace|debug|info|warn|error` - set a specific level
//! - `MONGO_LIFECYCLE_LOG_FORMAT=json|pretty|compact` - output format (default: json)
//!
//! ```rust,no_run
//! mongo_lifecycle::logging::init();
//! ```
//!
//! Installing a subscriber requires the `tracing-subscriber` feature. Without
//! it `init` is a no-op and applications are expected to bring their own.

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

const DEBUG_VAR: &str = "MONGO_LIFECYCLE_DEBUG";
const LEVEL_VAR: &str = "MONGO_LIFECYCLE_LOG_LEVEL";
const FORMAT_VAR: &str = "MONGO_LIFECYCLE_LOG_FORMAT";

/// Check if debug logging is enabled via `MONGO_LIFECYCLE_DEBUG`.
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var(DEBUG_VAR)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// The configured log level.
///
/// Defaults to "debug" when debug logging is enabled, otherwise "warn".
pub fn log_level() -> &'static str {
    let fallback = if is_debug_enabled() { "debug" } else { "warn" };
    match env::var(LEVEL_VAR) {
        Ok(level) => match level.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

/// The configured output format, "json" unless overridden.
pub fn log_format() -> &'static str {
    env::var(FORMAT_VAR)
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "compact" => "compact",
            _ => "json",
        })
        .unwrap_or("json")
}

/// Install a global subscriber for this crate's events.
///
/// Only the first call has an effect, and only when debug logging or an
/// explicit level was requested through the environment.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var(LEVEL_VAR).is_err() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = log_level();
            let filter = EnvFilter::try_new(format!("mongo_lifecycle={}", level))
                .unwrap_or_else(|_| EnvFilter::new("warn"));

            let registry = tracing_subscriber::registry().with(filter);
            let installed = match log_format() {
                "json" => registry.with(fmt::layer().json()).try_init(),
                "compact" => registry.with(fmt::layer().compact()).try_init(),
                _ => registry.with(fmt::layer().pretty()).try_init(),
            };

            if installed.is_ok() {
                tracing::info!(level = level, format = log_format(), "logging initialized");
            }
        }
    });
}
