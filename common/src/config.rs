//! Environment variable parsing helpers
//!
//! Provides ergonomic helpers for reading configuration from environment variables.

use anyhow::{anyhow, Result};
use std::env;
use std::str::FromStr;

/// Extension trait for parsing environment variables.
///
/// Provides convenient methods for reading env vars with defaults, fallback
/// names and type parsing.
pub trait ConfigExt {
    /// Get an environment variable with a default value.
    ///
    /// # Example
    /// ```ignore
    /// let socket_dir = String::env_or("CLOUDSQL_SOCKET_DIR", "/cloudsql");
    /// ```
    fn env_or(name: &str, default: &str) -> String {
        env::var(name).unwrap_or_else(|_| default.to_string())
    }

    /// Get the first non-empty variable out of a list of candidate names.
    ///
    /// Used where a deployment may still carry a legacy spelling of a variable.
    fn env_first(names: &[&str]) -> Option<String> {
        names
            .iter()
            .filter_map(|name| env::var(name).ok())
            .find(|value| !value.trim().is_empty())
    }

    /// Like `env_first`, but an error naming every candidate when none is set.
    fn env_first_required(names: &[&str]) -> Result<String> {
        Self::env_first(names).ok_or_else(|| anyhow!("{} must be set", names.join(" or ")))
    }

    /// Get an environment variable as a boolean.
    ///
    /// Returns `true` if the value is "true" (case-insensitive), otherwise `default`.
    fn env_bool(name: &str, default: bool) -> bool {
        env::var(name)
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(default)
    }

    /// Get an environment variable parsed as a specific type.
    ///
    /// Returns `default` if the variable is not set or fails to parse.
    ///
    /// # Example
    /// ```ignore
    /// let port: u16 = u16::env_parse("DB_PORT", 5432);
    /// ```
    fn env_parse<T: FromStr>(name: &str, default: T) -> T {
        env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

// Blanket implementation for all types
impl<T> ConfigExt for T {}

/// Google Cloud runtime environment helpers.
pub struct GcpEnv;

impl GcpEnv {
    /// Check if running as a Cloud Function / Cloud Run service.
    pub fn is_serverless() -> bool {
        env::var("K_SERVICE").is_ok() || env::var("FUNCTION_TARGET").is_ok()
    }

    /// Name of the deployed service or function, if any.
    pub fn service_name() -> String {
        env::var("K_SERVICE")
            .or_else(|_| env::var("FUNCTION_NAME"))
            .unwrap_or_else(|_| "local".to_string())
    }

    /// Revision of the deployed service, if any.
    pub fn revision() -> String {
        env::var("K_REVISION").unwrap_or_default()
    }

    /// Host of the metadata server.
    pub fn metadata_host() -> String {
        String::env_or("GCE_METADATA_HOST", "metadata.google.internal")
    }

    /// Telemetry endpoint, if one is configured.
    pub fn telemetry_endpoint() -> Option<String> {
        String::env_first(&["TELEMETRY_ENDPOINT"])
    }
}
