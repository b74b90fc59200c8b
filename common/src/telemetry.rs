//! Telemetry for reporting provisioning events
//!
//! Every event is logged locally. When `TELEMETRY_ENDPOINT` is configured the
//! event is also POSTed there as JSON.

use crate::config::GcpEnv;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// All telemetry events emitted by the provisioner binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TelemetryEvent {
    // === Provisioning run ===
    /// A provisioning run started
    ProvisioningStarted {
        run_id: String,
        database: String,
        publication: String,
        slot: String,
    },

    /// A provisioning step committed
    StepCompleted {
        run_id: String,
        index: usize,
        step: String,
    },

    /// A provisioning step failed and was rolled back
    StepFailed {
        run_id: String,
        index: usize,
        step: String,
        error: String,
    },

    /// All steps committed
    ProvisioningCompleted {
        run_id: String,
        duration_ms: u64,
        steps_applied: Vec<String>,
    },

    /// The run terminated before completing every step
    ProvisioningFailed {
        run_id: String,
        phase: String,
        error: String,
    },

    // === Secret rotation ===
    /// A new secret version was stored
    SecretVersionAdded { secret: String, version: String },

    // === Generic Events ===
    /// Component started
    ComponentStarted { component: String, version: String },
}

impl TelemetryEvent {
    /// Get the event type name for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ProvisioningStarted { .. } => "REPLICATION_PROVISIONING_STARTED",
            Self::StepCompleted { .. } => "REPLICATION_STEP_COMPLETED",
            Self::StepFailed { .. } => "REPLICATION_STEP_FAILED",
            Self::ProvisioningCompleted { .. } => "REPLICATION_PROVISIONING_COMPLETED",
            Self::ProvisioningFailed { .. } => "REPLICATION_PROVISIONING_FAILED",
            Self::SecretVersionAdded { .. } => "SECRET_VERSION_ADDED",
            Self::ComponentStarted { .. } => "COMPONENT_STARTED",
        }
    }

    /// Whether the event reports a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::StepFailed { .. } | Self::ProvisioningFailed { .. }
        )
    }

    /// Convert event to a human-readable message.
    pub fn message(&self) -> String {
        match self {
            Self::ProvisioningStarted {
                database,
                publication,
                slot,
                ..
            } => {
                format!(
                    "Provisioning publication {} and slot {} on {}",
                    publication, slot, database
                )
            }
            Self::StepCompleted { index, step, .. } => {
                format!("Step {} ({}) committed", index, step)
            }
            Self::StepFailed {
                index, step, error, ..
            } => {
                format!("Step {} ({}) failed: {}", index, step, error)
            }
            Self::ProvisioningCompleted {
                duration_ms,
                steps_applied,
                ..
            } => {
                format!(
                    "Provisioning completed ({} steps) in {}ms",
                    steps_applied.len(),
                    duration_ms
                )
            }
            Self::ProvisioningFailed { phase, error, .. } => {
                format!("Provisioning failed during {}: {}", phase, error)
            }
            Self::SecretVersionAdded { secret, version } => {
                format!("Added version {} to secret {}", version, secret)
            }
            Self::ComponentStarted { component, version } => {
                format!("{} v{} started", component, version)
            }
        }
    }
}

/// Telemetry handle passed explicitly to whatever emits events.
#[derive(Clone, Debug)]
pub struct Telemetry {
    client: Arc<Client>,
    endpoint: Option<String>,
    service: String,
    revision: String,
    component: String,
}

impl Telemetry {
    /// Create a new telemetry handle from environment variables.
    pub fn from_env(component: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client: Arc::new(client),
            endpoint: GcpEnv::telemetry_endpoint(),
            service: GcpEnv::service_name(),
            revision: GcpEnv::revision(),
            component: component.to_string(),
        }
    }

    /// A handle that only logs locally.
    pub fn local(component: &str) -> Self {
        Self {
            client: Arc::new(Client::new()),
            endpoint: None,
            service: "local".to_string(),
            revision: String::new(),
            component: component.to_string(),
        }
    }

    /// Whether events leave the process.
    pub fn is_remote(&self) -> bool {
        self.endpoint.is_some()
    }

    fn log(event: &TelemetryEvent) {
        let event_type = event.event_type();
        if event.is_failure() {
            error!(event = %event_type, "{}", event.message());
        } else {
            info!(event = %event_type, "{}", event.message());
        }
    }

    fn payload(&self, event: &TelemetryEvent) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4().to_string(),
            "event": event.event_type(),
            "message": event.message(),
            "component": self.component,
            "service": self.service,
            "revision": self.revision,
            "timestamp": Utc::now().to_rfc3339(),
            "data": event,
        })
    }

    /// Send a telemetry event (fire and forget, non-blocking).
    ///
    /// Spawns onto the current tokio runtime. Errors are logged but do not
    /// affect the caller. Outside a runtime the event is only logged.
    ///
    /// Nothing waits for the spawned request: events still in flight when
    /// the runtime shuts down are dropped. Send the last event of a run
    /// with `send_and_wait`.
    pub fn send(&self, event: TelemetryEvent) {
        // Log locally first
        Self::log(&event);

        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let client = Arc::clone(&self.client);
        let payload = self.payload(&event);

        handle.spawn(async move {
            match client.post(&endpoint).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    // Success - no action needed
                }
                Ok(resp) => {
                    warn!("Telemetry got status {}", resp.status());
                }
                Err(e) => {
                    warn!("Telemetry send failed: {}", e);
                }
            }
        });
    }

    /// Send a telemetry event and wait for the endpoint to accept it.
    ///
    /// Use this for the final event of a run, which would otherwise be lost
    /// when the runtime shuts down.
    pub async fn send_and_wait(&self, event: TelemetryEvent) -> Result<(), reqwest::Error> {
        Self::log(&event);

        let Some(endpoint) = &self.endpoint else {
            return Ok(());
        };

        self.client
            .post(endpoint)
            .json(&self.payload(&event))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
