//! In-memory stand-ins for the secret store and the database, shared by the
//! unit tests.

use crate::config::ProvisioningConfig;
use crate::connection::{ConnectionError, DatabaseSession, SessionError, SessionFactory};
use crate::secrets::{SecretError, SecretStore};
use crate::sequencer::{build_plan, ProvisioningStep, ReplicationTargets};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub fn orders_config() -> ProvisioningConfig {
    ProvisioningConfig {
        project_id: "fms-prod".to_string(),
        db_host_project_id: "fms-db-host".to_string(),
        database_name: "orders_db".to_string(),
        replication_slot_name: "orders_slot".to_string(),
        publication_name: "orders_pub".to_string(),
    }
}

pub fn orders_plan() -> Vec<ProvisioningStep> {
    let targets = ReplicationTargets::from_config(&orders_config())
        .unwrap()
        .with_roles("core_svc", "report_svc")
        .unwrap();
    build_plan(&targets)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Begin,
    Execute(String),
    Commit,
    Rollback,
    Close,
}

/// Records every call and fails where told to.
#[derive(Default)]
pub struct FakeSession {
    calls: Arc<Mutex<Vec<SessionCall>>>,
    fail_begin: Option<SessionError>,
    fail_execute: Option<(String, SessionError)>,
    fail_commit: Option<(String, SessionError)>,
    fail_rollback: bool,
    last_statement: String,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<SessionCall>>> {
        Arc::clone(&self.calls)
    }

    /// Fail `execute` for the first statement containing `pattern`.
    pub fn fail_on(mut self, pattern: &str, err: SessionError) -> Self {
        self.fail_execute = Some((pattern.to_string(), err));
        self
    }

    /// Fail `commit` of the transaction whose statement contains `pattern`.
    pub fn fail_commit_of(mut self, pattern: &str, err: SessionError) -> Self {
        self.fail_commit = Some((pattern.to_string(), err));
        self
    }

    pub fn fail_begin(mut self, err: SessionError) -> Self {
        self.fail_begin = Some(err);
        self
    }

    pub fn fail_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }

    fn record(&self, call: SessionCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DatabaseSession for FakeSession {
    async fn begin(&mut self) -> Result<(), SessionError> {
        self.record(SessionCall::Begin);
        match &self.fail_begin {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn execute(&mut self, statement: &str) -> Result<(), SessionError> {
        self.record(SessionCall::Execute(statement.to_string()));
        self.last_statement = statement.to_string();
        match &self.fail_execute {
            Some((pattern, err)) if statement.contains(pattern.as_str()) => Err(err.clone()),
            _ => Ok(()),
        }
    }

    async fn commit(&mut self) -> Result<(), SessionError> {
        self.record(SessionCall::Commit);
        match &self.fail_commit {
            Some((pattern, err)) if self.last_statement.contains(pattern.as_str()) => {
                Err(err.clone())
            }
            _ => Ok(()),
        }
    }

    async fn rollback(&mut self) -> Result<(), SessionError> {
        self.record(SessionCall::Rollback);
        if self.fail_rollback {
            Err(SessionError::Closed("connection lost".to_string()))
        } else {
            Ok(())
        }
    }

    async fn close(&mut self) {
        self.record(SessionCall::Close);
    }
}

/// Hands out one prepared session and refuses any further request.
pub struct FakeSessionFactory {
    session: Mutex<Option<FakeSession>>,
    failure: Option<String>,
    requests: Mutex<Vec<(String, String, String)>>,
}

impl FakeSessionFactory {
    pub fn new(session: FakeSession) -> Self {
        Self {
            session: Mutex::new(Some(session)),
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn refusing(message: &str) -> Self {
        Self {
            session: Mutex::new(None),
            failure: Some(message.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// `(instance, user, database)` for every session requested.
    pub fn requests(&self) -> Vec<(String, String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    type Session = FakeSession;

    async fn create_session(
        &self,
        instance_connection_name: &str,
        user: &str,
        _password: &str,
        database: &str,
    ) -> Result<FakeSession, ConnectionError> {
        self.requests.lock().unwrap().push((
            instance_connection_name.to_string(),
            user.to_string(),
            database.to_string(),
        ));

        let refused = |message: String| ConnectionError::Connect {
            target: instance_connection_name.to_string(),
            user: user.to_string(),
            message,
        };

        if let Some(message) = &self.failure {
            return Err(refused(message.clone()));
        }
        self.session
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| refused("only one session per run".to_string()))
    }
}

/// Secrets keyed by `project/secret`.
#[derive(Default)]
pub struct FakeSecretStore {
    secrets: HashMap<String, String>,
    lookups: Mutex<Vec<String>>,
    added: Mutex<Vec<(String, String)>>,
}

impl FakeSecretStore {
    pub fn with_orders_secrets() -> Self {
        let mut store = Self::default();
        for (secret, value) in [
            ("fms_database_connection_name", "fms-db-host:europe-west2:fms-pg"),
            ("core_service_db_username", "core_svc"),
            ("core_service_db_password", "s3cret"),
            ("reporting_service_db_username", "report_svc"),
        ] {
            store
                .secrets
                .insert(format!("fms-db-host/{}", secret), value.to_string());
        }
        store
    }

    pub fn without(mut self, secret: &str) -> Self {
        self.secrets.remove(&format!("fms-db-host/{}", secret));
        self
    }

    pub fn with_value(mut self, secret: &str, value: &str) -> Self {
        self.secrets
            .insert(format!("fms-db-host/{}", secret), value.to_string());
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }

    /// `(project/secret, value)` for every version added.
    pub fn added(&self) -> Vec<(String, String)> {
        self.added.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecretStore for FakeSecretStore {
    async fn get_latest_secret(
        &self,
        project_id: &str,
        secret_id: &str,
    ) -> Result<String, SecretError> {
        let key = format!("{}/{}", project_id, secret_id);
        self.lookups.lock().unwrap().push(key.clone());

        self.secrets
            .get(&key)
            .cloned()
            .ok_or_else(|| SecretError::NotFound {
                project: project_id.to_string(),
                secret: secret_id.to_string(),
            })
    }

    async fn add_secret_version(
        &self,
        project_id: &str,
        secret_id: &str,
        value: &str,
    ) -> Result<String, SecretError> {
        let mut added = self.added.lock().unwrap();
        added.push((format!("{}/{}", project_id, secret_id), value.to_string()));
        Ok(format!(
            "projects/{}/secrets/{}/versions/{}",
            project_id,
            secret_id,
            added.len()
        ))
    }
}
