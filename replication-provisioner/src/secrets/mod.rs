//! Secret store access
//!
//! Only two operations exist: read the latest version of a secret, and add
//! a new version. There is no version pinning and no retry.

mod gcp;

pub use gcp::SecretManagerRest;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    #[error("secret {secret} not found in project {project}")]
    NotFound { project: String, secret: String },

    #[error("failed to access secret {secret} in project {project}: {message}")]
    Access {
        project: String,
        secret: String,
        message: String,
    },

    #[error("failed to add a version to secret {secret} in project {project}: {message}")]
    Write {
        project: String,
        secret: String,
        message: String,
    },

    #[error("secret manager authentication failed: {0}")]
    Auth(String),
}

impl SecretError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Key-value secret store with "get latest" and "add version".
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Payload of the most recent version. Never empty.
    async fn get_latest_secret(&self, project_id: &str, secret_id: &str)
        -> Result<String, SecretError>;

    /// Store `value` as a new version and return the version's resource name.
    async fn add_secret_version(
        &self,
        project_id: &str,
        secret_id: &str,
        value: &str,
    ) -> Result<String, SecretError>;
}

/// Reject ids that would change the shape of a resource path.
pub(crate) fn check_resource_id(kind: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{kind} must not be empty"));
    }
    if value.contains(['/', ':', '?', '#']) || value.chars().any(char::is_whitespace) {
        return Err(format!("{kind} {value:?} contains characters not allowed in a resource id"));
    }
    Ok(())
}

/// Project ids may carry one `domain:` prefix (`example.com:fms-db-host`).
pub(crate) fn check_project_id(value: &str) -> Result<(), String> {
    match value.split_once(':') {
        Some((domain, project)) => {
            check_resource_id("project domain", domain)?;
            check_resource_id("project id", project)
        }
        None => check_resource_id("project id", value),
    }
}
