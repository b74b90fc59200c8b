//! Shared utilities for the replication provisioner
//!
//! This crate provides common functionality used by every provisioner binary:
//! - Structured logging initialization
//! - Environment variable parsing helpers
//! - Telemetry for reporting provisioning events

pub mod config;
pub mod logging;
pub mod telemetry;

pub use config::{ConfigExt, GcpEnv};
pub use logging::init_logging;
pub use telemetry::{Telemetry, TelemetryEvent};
