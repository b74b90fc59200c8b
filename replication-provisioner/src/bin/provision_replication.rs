//! Provision logical replication for one database
//!
//! Reads the target names from the environment, the connection details from
//! Secret Manager, and applies the replication plan in one session. Exits
//! non-zero on the first failure.

use anyhow::Result;
use common::{init_logging, GcpEnv, Telemetry, TelemetryEvent};
use replication_provisioner::{
    error_chain, provision, CloudSqlConnector, ProvisioningConfig, SecretManagerRest, SecretNames,
};
use tracing::{error, info};

const COMPONENT: &str = "provision-replication";

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logging(COMPONENT);

    let telemetry = Telemetry::from_env(COMPONENT);
    telemetry.send(TelemetryEvent::ComponentStarted {
        component: COMPONENT.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let config = ProvisioningConfig::from_env()?;
    let secret_names = SecretNames::from_env();

    info!(
        project = %config.project_id,
        db_host_project = %config.db_host_project_id,
        database = %config.database_name,
        serverless = GcpEnv::is_serverless(),
        "=== Replication Provisioner ==="
    );

    let store = SecretManagerRest::from_env().await?;
    let connector = CloudSqlConnector::from_env()?;

    match provision(&config, &secret_names, &store, &connector, &telemetry).await {
        Ok(report) => {
            info!(
                run_id = %report.run_id,
                steps = report.steps_applied.len(),
                duration_ms = report.duration.as_millis() as u64,
                "Replication provisioned"
            );
            Ok(())
        }
        Err(e) => {
            if e.is_already_exists() {
                error!("An object from a previous run already exists; drop it or skip provisioning");
            }
            anyhow::bail!("provisioning failed: {}", error_chain(&e))
        }
    }
}
