//! Error taxonomy for a provisioning run

use crate::connection::ConnectionError;
use crate::secrets::SecretError;
use crate::sequencer::{IdentifierError, ProvisioningStepError};
use thiserror::Error;

/// Any failure that terminates a provisioning run.
///
/// Every variant is fatal. Variants are ordered by the phase that raises them:
/// nothing touches the database before `Connection` can occur.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// Missing or invalid configuration, secret identifiers or SQL identifiers.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Step(#[from] ProvisioningStepError),
}

impl ProvisioningError {
    /// Phase of the run the error was raised in, for telemetry.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Secret(_) => "resolve_secrets",
            Self::Connection(_) => "connect",
            Self::Step(_) => "provision",
        }
    }

    /// True when a step failed because its object already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::Step(step) if step.is_already_exists())
    }
}

impl From<IdentifierError> for ProvisioningError {
    fn from(err: IdentifierError) -> Self {
        Self::Configuration(err.to_string())
    }
}
