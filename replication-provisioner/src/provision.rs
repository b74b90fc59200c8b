//! One provisioning run, from configuration to the last grant

use crate::config::{ProvisioningConfig, SecretNames};
use crate::connection::SessionFactory;
use crate::credentials::resolve_credentials;
use crate::error::ProvisioningError;
use crate::secrets::SecretStore;
use crate::sequencer::{build_plan, ReplicationTargets, Sequencer, StepKind};
use common::{Telemetry, TelemetryEvent};
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Outcome of a run where every step committed.
#[derive(Debug, Clone)]
pub struct ProvisioningReport {
    pub run_id: String,
    pub steps_applied: Vec<StepKind>,
    pub duration: Duration,
}

/// Provision publication, slot and reporting grants for `config`.
///
/// Identifiers are validated before any secret is read, and secrets are
/// resolved before a session is opened, so each failure class leaves
/// everything after it untouched.
pub async fn provision<S, F>(
    config: &ProvisioningConfig,
    secret_names: &SecretNames,
    store: &S,
    factory: &F,
    telemetry: &Telemetry,
) -> Result<ProvisioningReport, ProvisioningError>
where
    S: SecretStore + ?Sized,
    F: SessionFactory + ?Sized,
{
    let run_id = Uuid::new_v4().to_string();
    let span = info_span!(
        "provision",
        run_id = %run_id,
        project = %config.project_id,
        database = %config.database_name
    );

    async {
        let start = Instant::now();

        telemetry.send(TelemetryEvent::ProvisioningStarted {
            run_id: run_id.clone(),
            database: config.database_name.clone(),
            publication: config.publication_name.clone(),
            slot: config.replication_slot_name.clone(),
        });

        let result = run_phases(&run_id, config, secret_names, store, factory, telemetry).await;

        let event = match &result {
            Ok(steps_applied) => TelemetryEvent::ProvisioningCompleted {
                run_id: run_id.clone(),
                duration_ms: start.elapsed().as_millis() as u64,
                steps_applied: steps_applied.iter().map(|s| s.name().to_string()).collect(),
            },
            Err(e) => {
                error!(phase = e.phase(), error = %e, "Provisioning failed");
                TelemetryEvent::ProvisioningFailed {
                    run_id: run_id.clone(),
                    phase: e.phase().to_string(),
                    error: error_chain(e),
                }
            }
        };
        if let Err(e) = telemetry.send_and_wait(event).await {
            warn!(error = %e, "Failed to deliver final telemetry event");
        }

        result.map(|steps_applied| ProvisioningReport {
            run_id: run_id.clone(),
            steps_applied,
            duration: start.elapsed(),
        })
    }
    .instrument(span)
    .await
}

async fn run_phases<S, F>(
    run_id: &str,
    config: &ProvisioningConfig,
    secret_names: &SecretNames,
    store: &S,
    factory: &F,
    telemetry: &Telemetry,
) -> Result<Vec<StepKind>, ProvisioningError>
where
    S: SecretStore + ?Sized,
    F: SessionFactory + ?Sized,
{
    let replication = ReplicationTargets::from_config(config)?;

    let creds = resolve_credentials(store, &config.db_host_project_id, secret_names).await?;
    let targets = replication.with_roles(&creds.privileged_user, &creds.reporting_user)?;
    let plan = build_plan(&targets);

    let session = factory
        .create_session(
            &creds.instance_connection_name,
            &creds.privileged_user,
            &creds.privileged_password,
            &config.database_name,
        )
        .await?;

    info!(
        publication = %targets.replication.publication,
        slot = %targets.replication.slot,
        reporting_role = %targets.reporting_role,
        steps = plan.len(),
        "Applying provisioning steps"
    );

    let applied = Sequencer::new(run_id, plan, telemetry).run(session).await?;
    Ok(applied)
}

/// Render an error with its causes, `outer: inner: ...`.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SessionError;
    use crate::testing::{orders_config, FakeSecretStore, FakeSession, FakeSessionFactory, SessionCall};

    #[tokio::test]
    async fn orders_scenario_runs_every_step_as_the_privileged_role() {
        let telemetry = Telemetry::local("test");
        let store = FakeSecretStore::with_orders_secrets();
        let session = FakeSession::new();
        let calls = session.calls();
        let factory = FakeSessionFactory::new(session);

        let report = provision(
            &orders_config(),
            &SecretNames::default(),
            &store,
            &factory,
            &telemetry,
        )
        .await
        .unwrap();

        assert_eq!(report.steps_applied, StepKind::ALL.to_vec());
        assert!(!report.run_id.is_empty());
        assert_eq!(
            factory.requests(),
            vec![(
                "fms-db-host:europe-west2:fms-pg".to_string(),
                "core_svc".to_string(),
                "orders_db".to_string(),
            )]
        );

        let calls = calls.lock().unwrap();
        assert!(calls.contains(&SessionCall::Execute(
            "ALTER DEFAULT PRIVILEGES IN SCHEMA public GRANT SELECT ON TABLES TO \"report_svc\""
                .to_string()
        )));
        assert_eq!(
            calls.iter().filter(|c| **c == SessionCall::Close).count(),
            1
        );
    }

    #[tokio::test]
    async fn invalid_identifier_fails_before_any_lookup() {
        let telemetry = Telemetry::local("test");
        let store = FakeSecretStore::with_orders_secrets();
        let factory = FakeSessionFactory::new(FakeSession::new());
        let mut config = orders_config();
        config.replication_slot_name = "orders_slot'); DROP TABLE orders; --".to_string();

        let err = provision(&config, &SecretNames::default(), &store, &factory, &telemetry)
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisioningError::Configuration(_)));
        assert_eq!(err.phase(), "configuration");
        assert!(store.lookups().is_empty());
        assert!(factory.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_secret_aborts_before_connecting() {
        let telemetry = Telemetry::local("test");
        let store = FakeSecretStore::with_orders_secrets().without("core_service_db_password");
        let factory = FakeSessionFactory::new(FakeSession::new());

        let err = provision(
            &orders_config(),
            &SecretNames::default(),
            &store,
            &factory,
            &telemetry,
        )
        .await
        .unwrap_err();

        match &err {
            ProvisioningError::Secret(secret) => assert!(secret.is_not_found()),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "secret core_service_db_password not found in project fms-db-host"
        );
        assert!(factory.requests().is_empty());
    }

    #[tokio::test]
    async fn unsafe_role_name_in_secret_is_a_configuration_error() {
        let telemetry = Telemetry::local("test");
        let store = FakeSecretStore::with_orders_secrets()
            .with_value("reporting_service_db_username", "report_svc; DROP ROLE core_svc");
        let factory = FakeSessionFactory::new(FakeSession::new());

        let err = provision(
            &orders_config(),
            &SecretNames::default(),
            &store,
            &factory,
            &telemetry,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ProvisioningError::Configuration(_)));
        assert!(factory.requests().is_empty());
    }

    #[tokio::test]
    async fn connection_failure_runs_no_steps() {
        let telemetry = Telemetry::local("test");
        let store = FakeSecretStore::with_orders_secrets();
        let factory = FakeSessionFactory::refusing("password authentication failed");

        let err = provision(
            &orders_config(),
            &SecretNames::default(),
            &store,
            &factory,
            &telemetry,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ProvisioningError::Connection(_)));
        assert_eq!(err.phase(), "connect");
        assert_eq!(factory.requests().len(), 1);
    }

    #[tokio::test]
    async fn existing_slot_surfaces_step_three_with_cause() {
        let telemetry = Telemetry::local("test");
        let store = FakeSecretStore::with_orders_secrets();
        let session = FakeSession::new().fail_on(
            "pg_create_logical_replication_slot",
            SessionError::AlreadyExists {
                message: "replication slot \"orders_slot\" already exists".to_string(),
            },
        );
        let calls = session.calls();
        let factory = FakeSessionFactory::new(session);

        let err = provision(
            &orders_config(),
            &SecretNames::default(),
            &store,
            &factory,
            &telemetry,
        )
        .await
        .unwrap_err();

        assert!(err.is_already_exists());
        match &err {
            ProvisioningError::Step(step) => {
                assert_eq!(step.index, 3);
                assert_eq!(step.kind, StepKind::CreateReplicationSlot);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            error_chain(&err),
            "step 3 (create_replication_slot) failed executing \
             `SELECT pg_create_logical_replication_slot('orders_slot', 'pgoutput')`: \
             already exists: replication slot \"orders_slot\" already exists"
        );
        assert_eq!(calls.lock().unwrap().last(), Some(&SessionCall::Close));
    }
}
