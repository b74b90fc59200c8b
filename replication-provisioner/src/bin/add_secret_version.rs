//! Add a version to a secret
//!
//! Usage: add-secret-version <secret-id> [project-id]
//!
//! The value is read from stdin. The project defaults to DB_HOST_PROJECT_ID.
//! Prints the resource name of the new version.

use anyhow::{anyhow, Context, Result};
use common::{init_logging, ConfigExt, Telemetry};
use replication_provisioner::rotation::store_secret_version;
use replication_provisioner::SecretManagerRest;
use std::env;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const COMPONENT: &str = "add-secret-version";

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logging(COMPONENT);

    let mut args = env::args().skip(1);
    let secret_id = args
        .next()
        .ok_or_else(|| anyhow!("usage: {} <secret-id> [project-id]", COMPONENT))?;
    let project_id = match args.next() {
        Some(project) => project,
        None => String::env_first_required(&["DB_HOST_PROJECT_ID", "db_host_project_id"])?,
    };

    let mut value = String::new();
    tokio::io::stdin()
        .read_to_string(&mut value)
        .await
        .context("Failed to read secret value from stdin")?;

    let telemetry = Telemetry::from_env(COMPONENT);
    let store = SecretManagerRest::from_env().await?;

    let version = store_secret_version(&store, &project_id, &secret_id, &value, &telemetry).await?;

    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{}\n", version).as_bytes()).await?;
    stdout.flush().await?;

    Ok(())
}
