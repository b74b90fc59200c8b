//! Logical replication provisioner for Cloud SQL for PostgreSQL
//!
//! Resolves connection credentials from Secret Manager, opens one session as
//! the privileged application role and applies the replication plan:
//! replication attribute, publication, logical slot, and read access for the
//! reporting role.

pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod provision;
pub mod rotation;
pub mod secrets;
pub mod sequencer;

#[cfg(test)]
mod testing;

pub use config::{ProvisioningConfig, SecretNames};
pub use connection::{CloudSqlConnector, DatabaseSession, SessionError, SessionFactory};
pub use error::ProvisioningError;
pub use provision::{error_chain, provision, ProvisioningReport};
pub use secrets::{SecretError, SecretManagerRest, SecretStore};
pub use sequencer::{ProvisioningStepError, StepKind};
