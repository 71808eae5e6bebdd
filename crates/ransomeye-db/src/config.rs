//! Database configuration
//!
//! Per-service database users are mandatory; there are no default
//! credentials and weak ones are rejected at load.

use ransomeye_common::{validate_db_credentials, CommonError, Secret};

use crate::{DbError, DbResult};

/// Connection settings for one service's pool
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub postgres_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Read-only services reject writes at the session level
    pub read_only: bool,
}

impl DatabaseConfig {
    /// Assemble a config from per-service credentials. The username and
    /// password go through weak-credential rejection before any URL is
    /// built.
    pub fn for_service(
        host: &str,
        port: u16,
        database: &str,
        username: &str,
        password: &Secret,
        read_only: bool,
    ) -> DbResult<Self> {
        validate_db_credentials(username, password).map_err(|e| match e {
            CommonError::WeakCredential(m) => DbError::WeakCredential(m),
            other => DbError::Connection(other.to_string()),
        })?;

        Ok(Self {
            postgres_url: format!(
                "postgres://{}:{}@{}:{}/{}",
                username,
                password.expose(),
                host,
                port,
                database
            ),
            max_connections: 20,
            min_connections: 2,
            acquire_timeout_secs: 10,
            read_only,
        })
    }

    /// The connection URL with credentials masked, safe for logs
    pub fn postgres_url_masked(&self) -> String {
        match self.postgres_url.split_once('@') {
            Some((_, tail)) => format!("postgres://[REDACTED]@{}", tail),
            None => self.postgres_url.clone(),
        }
    }
}
