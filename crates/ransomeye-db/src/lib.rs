//! RansomEye Database Layer
//!
//! PostgreSQL persistence for the trust core. Each domain has its own
//! repository implementing the owning crate's storage trait, so the
//! in-memory stores and these repositories are interchangeable behind the
//! same seams.
//!
//! # Discipline
//!
//! - Explicit transactions at READ COMMITTED for every multi-row write
//! - Serialization failures, deadlocks, integrity violations, and
//!   read-only write attempts classify as FATAL for the caller
//! - Read-only services get a pool whose sessions reject writes outright

pub mod config;
pub mod error;
pub mod repos;

pub use config::*;
pub use error::*;
pub use repos::*;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// A connected database handle
pub struct Database {
    pub pg: PgPool,
}

impl Database {
    /// Connect with the bounded pool (min 2, max 20 by default)
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        tracing::info!(url = %config.postgres_url_masked(), "connecting to PostgreSQL");

        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs));

        if config.read_only {
            options = options.after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::Executor::execute(conn, "SET default_transaction_read_only = on")
                        .await?;
                    Ok(())
                })
            });
        }

        let pg = options
            .connect(&config.postgres_url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        tracing::info!("connected to PostgreSQL");
        Ok(Self { pg })
    }

    /// Apply the schema migrations
    pub async fn migrate(&self) -> DbResult<()> {
        tracing::info!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pg)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;
        tracing::info!("migrations complete");
        Ok(())
    }

    /// Liveness check
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pg).await.is_ok()
    }

    pub fn event_store(&self) -> PgEventStore {
        PgEventStore::new(self.pg.clone())
    }

    pub fn incident_repo(&self) -> PgIncidentRepo {
        PgIncidentRepo::new(self.pg.clone())
    }

    pub fn role_store(&self) -> PgRoleStore {
        PgRoleStore::new(self.pg.clone())
    }

    pub fn action_store(&self) -> PgActionStore {
        PgActionStore::new(self.pg.clone())
    }

    pub fn approval_store(&self) -> PgApprovalStore {
        PgApprovalStore::new(self.pg.clone())
    }

    pub fn mode_store(&self) -> PgModeStore {
        PgModeStore::new(self.pg.clone())
    }

    pub fn attestation_store(&self) -> PgAttestationStore {
        PgAttestationStore::new(self.pg.clone())
    }
}
