//! Storing a new secret version

use crate::secrets::{SecretError, SecretStore};
use common::{Telemetry, TelemetryEvent};
use tracing::info;

/// Store `value` as the newest version of `secret_id` and return its name.
///
/// A single trailing line ending is stripped so piped input stores the
/// value itself. Empty values are refused.
pub async fn store_secret_version<S>(
    store: &S,
    project_id: &str,
    secret_id: &str,
    value: &str,
    telemetry: &Telemetry,
) -> Result<String, SecretError>
where
    S: SecretStore + ?Sized,
{
    let value = value
        .strip_suffix("\r\n")
        .or_else(|| value.strip_suffix('\n'))
        .unwrap_or(value);

    if value.is_empty() {
        return Err(SecretError::Write {
            project: project_id.to_string(),
            secret: secret_id.to_string(),
            message: "refusing to store an empty value".to_string(),
        });
    }

    let version = store.add_secret_version(project_id, secret_id, value).await?;
    info!(project = project_id, secret = secret_id, version = %version, "Added secret version");

    telemetry.send(TelemetryEvent::SecretVersionAdded {
        secret: secret_id.to_string(),
        version: version.clone(),
    });

    Ok(version)
}
