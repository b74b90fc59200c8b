//! Credentials resolved from the secret store

use crate::config::SecretNames;
use crate::secrets::{SecretError, SecretStore};
use std::fmt;
use tracing::{debug, info};

/// Connection details for one run. Never persisted or logged.
#[derive(Clone)]
pub struct Credentials {
    pub instance_connection_name: String,
    pub privileged_user: String,
    pub privileged_password: String,
    pub reporting_user: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("instance_connection_name", &self.instance_connection_name)
            .field("privileged_user", &self.privileged_user)
            .field("privileged_password", &"<redacted>")
            .field("reporting_user", &self.reporting_user)
            .finish()
    }
}

/// Resolve the four connection secrets, in a fixed order, from `project_id`.
///
/// Stops at the first failed lookup.
pub async fn resolve_credentials<S>(
    store: &S,
    project_id: &str,
    names: &SecretNames,
) -> Result<Credentials, SecretError>
where
    S: SecretStore + ?Sized,
{
    let fetch = |secret_id: String| async move {
        debug!(secret = %secret_id, "Fetching secret");
        store.get_latest_secret(project_id, &secret_id).await
    };

    let instance_connection_name = fetch(names.instance_connection_name.clone()).await?;
    let privileged_user = fetch(names.privileged_user.clone()).await?;
    let privileged_password = fetch(names.privileged_password.clone()).await?;
    let reporting_user = fetch(names.reporting_user.clone()).await?;

    info!(
        project = project_id,
        instance = %instance_connection_name,
        "Resolved database credentials"
    );

    Ok(Credentials {
        instance_connection_name,
        privileged_user,
        privileged_password,
        reporting_user,
    })
}
