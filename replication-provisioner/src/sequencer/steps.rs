//! The ordered provisioning plan

use super::ident::{Identifier, IdentifierError, SlotName};
use crate::config::ProvisioningConfig;

/// Schema the reporting role is granted read access to.
pub const DEFAULT_SCHEMA: &str = "public";

/// Logical decoding output plugin used for the slot.
pub const OUTPUT_PLUGIN: &str = "pgoutput";

/// The seven mutations, in the only order they may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    GrantReplication,
    CreatePublication,
    CreateReplicationSlot,
    GrantConnect,
    GrantSelectOnTables,
    GrantSchemaUsage,
    AlterDefaultPrivileges,
}

impl StepKind {
    pub const ALL: [StepKind; 7] = [
        StepKind::GrantReplication,
        StepKind::CreatePublication,
        StepKind::CreateReplicationSlot,
        StepKind::GrantConnect,
        StepKind::GrantSelectOnTables,
        StepKind::GrantSchemaUsage,
        StepKind::AlterDefaultPrivileges,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::GrantReplication => "grant_replication",
            Self::CreatePublication => "create_publication",
            Self::CreateReplicationSlot => "create_replication_slot",
            Self::GrantConnect => "grant_connect",
            Self::GrantSelectOnTables => "grant_select_on_tables",
            Self::GrantSchemaUsage => "grant_schema_usage",
            Self::AlterDefaultPrivileges => "alter_default_privileges",
        }
    }
}

/// One statement of the plan. `index` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningStep {
    pub index: usize,
    pub kind: StepKind,
    pub statement: String,
}

/// Validated names taken from configuration alone.
///
/// Built before any secret is fetched so a bad deployment fails without
/// touching the network.
#[derive(Debug, Clone)]
pub struct ReplicationTargets {
    pub database: Identifier,
    pub publication: Identifier,
    pub slot: SlotName,
}

impl ReplicationTargets {
    pub fn from_config(config: &ProvisioningConfig) -> Result<Self, IdentifierError> {
        Ok(Self {
            database: Identifier::parse("database name", &config.database_name)?,
            publication: Identifier::parse("publication name", &config.publication_name)?,
            slot: SlotName::parse(&config.replication_slot_name)?,
        })
    }

    /// Complete the targets with the role names resolved from secrets.
    pub fn with_roles(
        self,
        privileged_user: &str,
        reporting_user: &str,
    ) -> Result<ProvisioningTargets, IdentifierError> {
        Ok(ProvisioningTargets {
            privileged_role: Identifier::parse("privileged role", privileged_user)?,
            reporting_role: Identifier::parse("reporting role", reporting_user)?,
            replication: self,
        })
    }
}

/// Every name the plan interpolates.
#[derive(Debug, Clone)]
pub struct ProvisioningTargets {
    pub privileged_role: Identifier,
    pub reporting_role: Identifier,
    pub replication: ReplicationTargets,
}

impl ProvisioningTargets {
    fn statement(&self, kind: StepKind) -> String {
        let privileged = self.privileged_role.quoted();
        let reporting = self.reporting_role.quoted();
        let targets = &self.replication;

        match kind {
            StepKind::GrantReplication => format!("ALTER ROLE {privileged} WITH REPLICATION"),
            StepKind::CreatePublication => format!(
                "CREATE PUBLICATION {} FOR ALL TABLES",
                targets.publication.quoted()
            ),
            StepKind::CreateReplicationSlot => format!(
                "SELECT pg_create_logical_replication_slot({}, '{OUTPUT_PLUGIN}')",
                targets.slot.literal()
            ),
            StepKind::GrantConnect => format!(
                "GRANT CONNECT ON DATABASE {} TO {reporting}",
                targets.database.quoted()
            ),
            StepKind::GrantSelectOnTables => {
                format!("GRANT SELECT ON ALL TABLES IN SCHEMA {DEFAULT_SCHEMA} TO {reporting}")
            }
            StepKind::GrantSchemaUsage => {
                format!("GRANT USAGE ON SCHEMA {DEFAULT_SCHEMA} TO {reporting}")
            }
            StepKind::AlterDefaultPrivileges => format!(
                "ALTER DEFAULT PRIVILEGES IN SCHEMA {DEFAULT_SCHEMA} GRANT SELECT ON TABLES TO {reporting}"
            ),
        }
    }
}

/// Build the full plan, one statement per step.
pub fn build_plan(targets: &ProvisioningTargets) -> Vec<ProvisioningStep> {
    StepKind::ALL
        .iter()
        .enumerate()
        .map(|(i, &kind)| ProvisioningStep {
            index: i + 1,
            kind,
            statement: targets.statement(kind),
        })
        .collect()
}
