//! Database sessions against a Cloud SQL instance
//!
//! A `SessionFactory` turns credentials into exactly one live
//! `DatabaseSession`. The production factory speaks tokio-postgres over the
//! Cloud SQL Unix socket mount, or over TCP when `DB_HOST` points at an auth
//! proxy or private IP.

use async_trait::async_trait;
use common::ConfigExt;
use native_tls::{Certificate, TlsConnector};
use postgres_native_tls::MakeTlsConnector;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode as PgSslMode;
use tokio_postgres::error::SqlState;
use tokio_postgres::Client;
use tracing::{debug, error, info, warn};

/// Application name reported to `pg_stat_activity`.
pub const APPLICATION_NAME: &str = "replication-provisioner";

/// Failure of a statement or transaction command on an open session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// SQLSTATE 42710: the publication, slot or role already exists.
    #[error("already exists: {message}")]
    AlreadyExists { message: String },

    #[error("database error {code}: {message}")]
    Database { code: String, message: String },

    #[error("session closed: {0}")]
    Closed(String),

    #[error("{0}")]
    Other(String),
}

impl SessionError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

impl From<tokio_postgres::Error> for SessionError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db) = err.as_db_error() {
            if *db.code() == SqlState::DUPLICATE_OBJECT {
                return Self::AlreadyExists {
                    message: db.message().to_string(),
                };
            }
            return Self::Database {
                code: db.code().code().to_string(),
                message: db.message().to_string(),
            };
        }
        if err.is_closed() {
            return Self::Closed(describe_pg_error(&err));
        }
        Self::Other(describe_pg_error(&err))
    }
}

/// Render a driver error with the cause its `Display` leaves out.
///
/// Server errors become `SEVERITY: message (SQLSTATE code)` plus detail and
/// hint. Anything else is the error followed by its source chain.
pub fn describe_pg_error(err: &tokio_postgres::Error) -> String {
    if let Some(db) = err.as_db_error() {
        let mut rendered = format!(
            "{}: {} (SQLSTATE {})",
            db.severity(),
            db.message(),
            db.code().code()
        );
        if let Some(detail) = db.detail() {
            rendered.push_str(&format!("; detail: {}", detail));
        }
        if let Some(hint) = db.hint() {
            rendered.push_str(&format!("; hint: {}", hint));
        }
        return rendered;
    }

    let mut rendered = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Failure to establish a session. No statement has run when this is raised.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid instance connection name {0:?}: expected project:region:instance")]
    InvalidInstance(String),

    #[error("invalid connection setting: {0}")]
    Config(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("failed to connect to {target} as {user}: {message}")]
    Connect {
        target: String,
        user: String,
        message: String,
    },
}

/// A single authenticated connection, used by one run only.
///
/// Transactions are driven explicitly so the caller decides what happens
/// between `begin` and `commit`.
#[async_trait]
pub trait DatabaseSession: Send {
    async fn begin(&mut self) -> Result<(), SessionError>;

    async fn execute(&mut self, statement: &str) -> Result<(), SessionError>;

    async fn commit(&mut self) -> Result<(), SessionError>;

    async fn rollback(&mut self) -> Result<(), SessionError>;

    /// Release the connection. Calls after this fail with `Closed`.
    async fn close(&mut self);
}

/// Produces sessions. Passed in explicitly instead of capturing a connect
/// closure.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: DatabaseSession;

    async fn create_session(
        &self,
        instance_connection_name: &str,
        user: &str,
        password: &str,
        database: &str,
    ) -> Result<Self::Session, ConnectionError>;
}

/// `DB_SSL_MODE` values. Only applies to TCP connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslMode {
    Disable,
    Prefer,
    Require,
}

impl FromStr for SslMode {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disable" => Ok(Self::Disable),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            other => Err(ConnectionError::Config(format!(
                "DB_SSL_MODE must be disable, prefer or require, got {other:?}"
            ))),
        }
    }
}

impl From<SslMode> for PgSslMode {
    fn from(mode: SslMode) -> Self {
        match mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
        }
    }
}

/// Where a session's socket lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Directory holding `.s.PGSQL.5432`.
    Socket(PathBuf),
    Tcp { host: String, port: u16 },
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Socket(dir) => write!(f, "{}", dir.display()),
            Self::Tcp { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

/// Check an instance connection name of the form `project:region:instance`.
///
/// Domain-scoped projects (`example.com:project:region:instance`) are accepted.
pub fn validate_instance_connection_name(name: &str) -> Result<(), ConnectionError> {
    let parts: Vec<&str> = name.split(':').collect();
    let well_formed = matches!(parts.len(), 3 | 4)
        && parts.iter().all(|p| !p.is_empty())
        && !name.contains(['/', ' ']);

    if well_formed {
        Ok(())
    } else {
        Err(ConnectionError::InvalidInstance(name.to_string()))
    }
}

/// Connection settings for Cloud SQL.
#[derive(Debug, Clone)]
pub struct CloudSqlConnector {
    pub socket_root: PathBuf,
    pub tcp: Option<(String, u16)>,
    pub ssl_mode: SslMode,
    pub root_cert: Option<PathBuf>,
    pub accept_invalid_certs: bool,
    pub connect_timeout: Duration,
}

impl Default for CloudSqlConnector {
    fn default() -> Self {
        Self {
            socket_root: PathBuf::from("/cloudsql"),
            tcp: None,
            ssl_mode: SslMode::Prefer,
            root_cert: None,
            accept_invalid_certs: false,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl CloudSqlConnector {
    /// Load connection settings from environment variables
    pub fn from_env() -> Result<Self, ConnectionError> {
        let tcp = String::env_first(&["DB_HOST"]).map(|host| (host, u16::env_parse("DB_PORT", 5432)));

        Ok(Self {
            socket_root: PathBuf::from(String::env_or("CLOUDSQL_SOCKET_DIR", "/cloudsql")),
            tcp,
            ssl_mode: String::env_or("DB_SSL_MODE", "prefer").parse()?,
            root_cert: String::env_first(&["DB_SSL_ROOT_CERT"]).map(PathBuf::from),
            accept_invalid_certs: bool::env_bool("DB_SSL_ACCEPT_INVALID_CERTS", false),
            connect_timeout: Duration::from_secs(u64::env_parse("DB_CONNECT_TIMEOUT_SECS", 30)),
        })
    }

    /// Resolve the transport for an instance.
    pub fn transport_for(&self, instance_connection_name: &str) -> Result<Transport, ConnectionError> {
        validate_instance_connection_name(instance_connection_name)?;

        Ok(match &self.tcp {
            Some((host, port)) => Transport::Tcp {
                host: host.clone(),
                port: *port,
            },
            None => Transport::Socket(self.socket_root.join(instance_connection_name)),
        })
    }

    fn pg_config(
        &self,
        transport: &Transport,
        user: &str,
        password: &str,
        database: &str,
    ) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .user(user)
            .password(password)
            .dbname(database)
            .application_name(APPLICATION_NAME)
            .connect_timeout(self.connect_timeout);

        match transport {
            Transport::Socket(dir) => {
                config.host_path(dir).ssl_mode(PgSslMode::Disable);
            }
            Transport::Tcp { host, port } => {
                config.host(host).port(*port).ssl_mode(self.ssl_mode.into());
            }
        }

        config
    }

    fn tls(&self) -> Result<MakeTlsConnector, ConnectionError> {
        let mut builder = TlsConnector::builder();

        if let Some(path) = &self.root_cert {
            let pem = std::fs::read(path).map_err(|e| {
                ConnectionError::Tls(format!("failed to read {}: {}", path.display(), e))
            })?;
            let cert = Certificate::from_pem(&pem)
                .map_err(|e| ConnectionError::Tls(format!("invalid root certificate: {}", e)))?;
            builder.add_root_certificate(cert);
        }

        if self.accept_invalid_certs {
            warn!("Accepting invalid TLS certificates for database connections");
            builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }

        let connector = builder
            .build()
            .map_err(|e| ConnectionError::Tls(e.to_string()))?;
        Ok(MakeTlsConnector::new(connector))
    }
}

#[async_trait]
impl SessionFactory for CloudSqlConnector {
    type Session = PgSession;

    async fn create_session(
        &self,
        instance_connection_name: &str,
        user: &str,
        password: &str,
        database: &str,
    ) -> Result<PgSession, ConnectionError> {
        let transport = self.transport_for(instance_connection_name)?;
        let config = self.pg_config(&transport, user, password, database);
        let tls = self.tls()?;

        debug!(target_addr = %transport, database, "Connecting");

        let (client, connection) =
            config
                .connect(tls)
                .await
                .map_err(|e| ConnectionError::Connect {
                    target: transport.to_string(),
                    user: user.to_string(),
                    message: describe_pg_error(&e),
                })?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "Database connection error");
            }
        });

        info!(target_addr = %transport, database, user, "Database session established");

        Ok(PgSession {
            client: Some(client),
            driver: Some(driver),
        })
    }
}

/// tokio-postgres backed session.
///
/// Transaction commands go over the simple query protocol, as do the
/// provisioning statements themselves since DDL takes no parameters.
pub struct PgSession {
    client: Option<Client>,
    driver: Option<JoinHandle<()>>,
}

impl PgSession {
    async fn simple(&mut self, sql: &str) -> Result<(), SessionError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| SessionError::Closed("session already released".to_string()))?;
        client.batch_execute(sql).await.map_err(SessionError::from)
    }
}

#[async_trait]
impl DatabaseSession for PgSession {
    async fn begin(&mut self) -> Result<(), SessionError> {
        self.simple("BEGIN").await
    }

    async fn execute(&mut self, statement: &str) -> Result<(), SessionError> {
        self.simple(statement).await
    }

    async fn commit(&mut self) -> Result<(), SessionError> {
        self.simple("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), SessionError> {
        self.simple("ROLLBACK").await
    }

    async fn close(&mut self) {
        // Dropping the client makes the driver send Terminate and finish.
        drop(self.client.take());
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                warn!(error = %e, "Connection driver task did not finish cleanly");
            }
        }
        debug!("Database session released");
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_connection_names() {
        assert!(validate_instance_connection_name("fms-db-host:europe-west2:fms-pg").is_ok());
        assert!(validate_instance_connection_name("example.com:fms:us-east1:pg").is_ok());

        for bad in ["fms-pg", "fms::pg", "a:b:c:d:e", "../etc:x:y", "a:b:c d"] {
            assert!(
                matches!(
                    validate_instance_connection_name(bad),
                    Err(ConnectionError::InvalidInstance(_))
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn socket_transport_is_the_default() {
        let connector = CloudSqlConnector::default();
        let transport = connector
            .transport_for("fms-db-host:europe-west2:fms-pg")
            .unwrap();
        assert_eq!(
            transport,
            Transport::Socket(PathBuf::from("/cloudsql/fms-db-host:europe-west2:fms-pg"))
        );
    }

    #[test]
    fn db_host_switches_to_tcp() {
        let connector = CloudSqlConnector {
            tcp: Some(("127.0.0.1".to_string(), 6432)),
            ..CloudSqlConnector::default()
        };
        let transport = connector.transport_for("p:r:i").unwrap();
        assert_eq!(transport.to_string(), "127.0.0.1:6432");
    }

    #[test]
    fn ssl_mode_parsing() {
        assert_eq!("REQUIRE".parse::<SslMode>().unwrap(), SslMode::Require);
        assert_eq!("prefer".parse::<SslMode>().unwrap(), SslMode::Prefer);
        assert!(matches!(
            "verify-full".parse::<SslMode>(),
            Err(ConnectionError::Config(_))
        ));
    }

    #[test]
    fn pg_config_carries_identity_and_database() {
        let connector = CloudSqlConnector::default();
        let transport = connector.transport_for("p:r:i").unwrap();
        let config = connector.pg_config(&transport, "core_svc", "secret", "orders_db");

        assert_eq!(config.get_user(), Some("core_svc"));
        assert_eq!(config.get_dbname(), Some("orders_db"));
        assert_eq!(config.get_application_name(), Some(APPLICATION_NAME));
        assert_eq!(config.get_ssl_mode(), PgSslMode::Disable);
    }

    #[tokio::test]
    async fn unreachable_socket_is_a_connection_error() {
        let connector = CloudSqlConnector {
            socket_root: PathBuf::from("/nonexistent-cloudsql-root"),
            connect_timeout: Duration::from_secs(1),
            ..CloudSqlConnector::default()
        };

        let err = connector
            .create_session("p:r:i", "core_svc", "secret", "orders_db")
            .await
            .err()
            .unwrap();
        match err {
            ConnectionError::Connect { target, message, .. } => {
                assert_eq!(target, "/nonexistent-cloudsql-root/p:r:i");
                // The io error behind "error connecting to server" is kept.
                assert!(message.starts_with("error connecting to server: "), "{message}");
                assert!(message.contains("os error 2"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
