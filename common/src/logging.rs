//! Structured logging initialization
//!
//! Provides consistent logging initialization across all provisioner binaries.

use crate::config::ConfigExt;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Guard that keeps the tracing subscriber active.
/// Drop this at the end of main to flush logs.
pub struct LogGuard;

/// Initialize structured logging for a component.
///
/// `LOG_FORMAT=json` emits one JSON object per line, which Cloud Logging
/// ingests with severity and fields intact. Anything else uses the compact
/// human-readable format.
///
/// Returns a guard that should be held for the lifetime of the program.
///
/// # Example
/// ```ignore
/// let _guard = init_logging("provision-replication");
/// info!("Starting up...");
/// ```
pub fn init_logging(component: &str) -> LogGuard {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let registry = tracing_subscriber::registry().with(filter);

    if String::env_or("LOG_FORMAT", "text").eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(true).with_target(false))
            .init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }

    tracing::debug!(component, "Logging initialized");

    LogGuard
}
