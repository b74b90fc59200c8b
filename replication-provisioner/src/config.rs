//! Provisioning configuration from environment variables
//!
//! Upper-case names are read first. The lower-case names used by existing
//! function deployments are accepted as a fallback.

use crate::error::ProvisioningError;
use common::ConfigExt;

/// Identifiers for one provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningConfig {
    pub project_id: String,
    /// Project that hosts the database and its secrets.
    pub db_host_project_id: String,
    pub database_name: String,
    pub replication_slot_name: String,
    pub publication_name: String,
}

impl ProvisioningConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ProvisioningError> {
        Self::from_lookup(|name| String::env_first(&[name]))
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Every missing variable is reported in one error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ProvisioningError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut required = |upper: &str, lower: &str| -> String {
            match lookup(upper)
                .or_else(|| lookup(lower))
                .filter(|v| !v.trim().is_empty())
            {
                Some(value) => value.trim().to_string(),
                None => {
                    missing.push(upper.to_string());
                    String::new()
                }
            }
        };

        let config = Self {
            project_id: required("PROJECT_ID", "project_id"),
            db_host_project_id: required("DB_HOST_PROJECT_ID", "db_host_project_id"),
            database_name: required("DB_NAME", "db_name"),
            replication_slot_name: required("DB_REPLICATION_NAME", "db_replication_name"),
            publication_name: required("DB_PUBLICATION_NAME", "db_publication_name"),
        };

        if missing.is_empty() {
            Ok(config)
        } else {
            Err(ProvisioningError::Configuration(format!(
                "{} must be set",
                missing.join(", ")
            )))
        }
    }
}

/// Well-known secret ids holding the connection details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretNames {
    pub instance_connection_name: String,
    pub privileged_user: String,
    pub privileged_password: String,
    pub reporting_user: String,
}

impl Default for SecretNames {
    fn default() -> Self {
        Self {
            instance_connection_name: "fms_database_connection_name".to_string(),
            privileged_user: "core_service_db_username".to_string(),
            privileged_password: "core_service_db_password".to_string(),
            reporting_user: "reporting_service_db_username".to_string(),
        }
    }
}

impl SecretNames {
    /// Defaults, each overridable by an environment variable.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| String::env_first(&[name]))
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let pick = |name: &str, default: String| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default)
        };

        Self {
            instance_connection_name: pick(
                "SECRET_INSTANCE_CONNECTION_NAME",
                defaults.instance_connection_name,
            ),
            privileged_user: pick("SECRET_PRIVILEGED_USER", defaults.privileged_user),
            privileged_password: pick("SECRET_PRIVILEGED_PASSWORD", defaults.privileged_password),
            reporting_user: pick("SECRET_REPORTING_USER", defaults.reporting_user),
        }
    }
}
