//! RansomEye Core Daemon
//!
//! Long-running daemons with single-threaded batch loops: correlation and
//! policy run one pass per cycle, sleeping `cycle_seconds` between passes
//! with no overlap; the TRE API serves enforcement requests in between.
//! SIGTERM/SIGINT set a shutdown flag observed at each loop iteration.

mod api;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ransomeye_common::{
    assert_supervised, escalate_fatal, exit_config_error, exit_startup_error,
    secret_from_env, spawn_watchdog, watchdog_interval, write_status, ConfigLoader,
    CycleStatus, ExitCode, ShutdownHandler,
};
use ransomeye_correlation::{CorrelationEngine, CorrelationError};
use ransomeye_crypto::{KeypairPayloadSigner, KeyVault};
use ransomeye_db::{Database, DatabaseConfig};
use ransomeye_ledger::{AuditLedger, KeypairSigner};
use ransomeye_policy::{FileDecisionStore, PolicyEngine};
use ransomeye_rbac::PermissionChecker;
use ransomeye_tre::{
    AttestationManager, EmptyResolver, EnforcementPipeline, HttpAgentTransport,
    IncidentGuard, ModeManager, ModeStore, RateLimiter,
};
use ransomeye_types::{KeyId, PolicyId, UserId};

/// RansomEye core daemon
#[derive(Parser, Debug)]
#[command(name = "ransomeye-cored")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Seconds between batch passes
    #[arg(long, env = "RANSOMEYE_CYCLE_SECONDS", default_value = "60")]
    cycle_seconds: u64,

    /// TRE API bind address
    #[arg(long, env = "RANSOMEYE_TRE_BIND", default_value = "127.0.0.1:8100")]
    tre_bind: String,

    /// Log level
    #[arg(long, env = "RANSOMEYE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(&args.log_level);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting ransomeye-cored");

    if let Err(e) = assert_supervised() {
        exit_startup_error(&e.to_string());
    }

    let config = match ConfigLoader::new("core")
        .require("RANSOMEYE_DB_HOST", "PostgreSQL host")
        .require("RANSOMEYE_DB_PORT", "PostgreSQL port")
        .require("RANSOMEYE_DB_NAME", "database name")
        .require("RANSOMEYE_CORE_DB_USER", "per-service database user")
        .require("RANSOMEYE_VAULT_DIR", "encrypted key vault directory")
        .require("RANSOMEYE_CORE_KEY_ID", "TRE signing key id")
        .require("RANSOMEYE_LEDGER_PATH", "audit ledger file")
        .require("RANSOMEYE_DECISION_DIR", "policy decision directory")
        .require("RANSOMEYE_AGENT_ENDPOINT", "agent command-gate endpoint")
        .optional("RANSOMEYE_STATUS_DIR", "daemon status directory", Some("/var/lib/ransomeye/status"))
        .load()
    {
        Ok(config) => config,
        Err(e) => exit_config_error(&e.to_string()),
    };

    let db_password = match secret_from_env("RANSOMEYE_CORE_DB_PASSWORD") {
        Ok(secret) => secret,
        Err(e) => exit_config_error(&e.to_string()),
    };
    let vault_passphrase = match secret_from_env("RANSOMEYE_VAULT_PASSPHRASE") {
        Ok(secret) => secret,
        Err(e) => exit_config_error(&e.to_string()),
    };
    let agent_token = match secret_from_env("RANSOMEYE_SERVICE_TOKEN") {
        Ok(secret) => secret,
        Err(e) => exit_config_error(&e.to_string()),
    };

    let db_config = match DatabaseConfig::for_service(
        config.get_required("RANSOMEYE_DB_HOST")?,
        config.get_port("RANSOMEYE_DB_PORT")?,
        config.get_required("RANSOMEYE_DB_NAME")?,
        config.get_required("RANSOMEYE_CORE_DB_USER")?,
        &db_password,
        false,
    ) {
        Ok(db_config) => db_config,
        Err(e) => exit_config_error(&e.to_string()),
    };
    let database = match Database::connect(&db_config).await {
        Ok(database) => database,
        Err(e) => exit_startup_error(&e.to_string()),
    };
    if let Err(e) = database.migrate().await {
        exit_startup_error(&e.to_string());
    }

    // signing keys come from the encrypted vault; refusing to start
    // without them is the no-stub-verifier rule
    let vault = match KeyVault::open(config.get_path("RANSOMEYE_VAULT_DIR")?) {
        Ok(vault) => vault,
        Err(e) => exit_startup_error(&e.to_string()),
    };
    let key_id = KeyId::new(config.get_required("RANSOMEYE_CORE_KEY_ID")?);
    let keypair = match vault.load_keypair(&key_id, vault_passphrase.expose()) {
        Ok(keypair) => keypair,
        Err(e) => exit_startup_error(&format!("cannot load TRE signing key: {}", e)),
    };

    let ledger = match AuditLedger::open(
        config.get_path("RANSOMEYE_LEDGER_PATH")?,
        Arc::new(KeypairSigner::new(keypair.clone())),
    ) {
        Ok(ledger) => Arc::new(ledger),
        Err(e) => exit_startup_error(&e.to_string()),
    };

    let incident_repo = Arc::new(database.incident_repo());
    let correlation = CorrelationEngine::new(incident_repo.clone());

    let decision_store = match FileDecisionStore::open(config.get_path("RANSOMEYE_DECISION_DIR")?) {
        Ok(store) => Arc::new(store),
        Err(e) => exit_startup_error(&e.to_string()),
    };
    let policy = PolicyEngine::new(
        Arc::new(KeypairPayloadSigner::new(keypair.clone())),
        decision_store,
        PolicyId::new(),
        env!("CARGO_PKG_VERSION"),
        UserId::new(),
    );

    let rbac = Arc::new(PermissionChecker::new(
        Arc::new(database.role_store()),
        ledger.clone(),
    ));
    let mode_store = Arc::new(database.mode_store());
    let transport = match HttpAgentTransport::new(
        config.get_required("RANSOMEYE_AGENT_ENDPOINT")?,
        agent_token.expose(),
    ) {
        Ok(transport) => Arc::new(transport),
        Err(e) => exit_startup_error(&e.to_string()),
    };

    let pipeline = Arc::new(EnforcementPipeline::new(
        IncidentGuard::new(incident_repo.clone(), ledger.clone()),
        rbac.clone(),
        mode_store.clone(),
        Arc::new(database.approval_store()),
        RateLimiter::new(ledger.clone()),
        Arc::new(EmptyResolver),
        Arc::new(database.action_store()),
        AttestationManager::new(Arc::new(database.attestation_store()), ledger.clone()),
        transport,
        Arc::new(KeypairPayloadSigner::new(keypair)),
        ledger.clone(),
    ));
    let mode_manager = Arc::new(ModeManager::new(mode_store.clone(), rbac, ledger.clone()));

    let shutdown = ShutdownHandler::new("core");
    shutdown.install_signal_handlers();
    let watchdog_stop = spawn_watchdog("core", watchdog_interval());

    // TRE API serves while the batch loops run
    let api_state = Arc::new(api::TreApiState {
        pipeline: pipeline.clone(),
        mode_manager,
    });
    let api_shutdown = shutdown.clone();
    let bind = args.tre_bind.clone();
    let api_task = tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&bind).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, "TRE API bind failed");
                return;
            }
        };
        tracing::info!(bind = %bind, "TRE API listening");
        let _ = axum::serve(listener, api::create_router(api_state))
            .with_graceful_shutdown(async move {
                loop {
                    if api_shutdown.is_shutdown_requested() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            })
            .await;
    });

    let status_path = PathBuf::from(config.get_required("RANSOMEYE_STATUS_DIR")?)
        .join("cored.status.json");
    let cycle = Duration::from_secs(args.cycle_seconds.max(1));
    let mut last_success = None;

    // the batch loop: one correlation pass, one policy pass, no overlap
    while !shutdown.is_shutdown_requested() {
        let pass = run_cycle(&correlation, &policy, &mode_store).await;
        match pass {
            Ok((correlated, recommended)) => {
                last_success = Some(chrono::Utc::now());
                tracing::info!(correlated, recommended, "cycle complete");
                let _ = write_status(&status_path, &CycleStatus::running("cored", last_success));
            }
            Err(CycleError::Fatal(reason)) => {
                let _ = write_status(&status_path, &CycleStatus::degraded("cored", &reason));
                escalate_fatal("cored", &reason);
            }
            Err(CycleError::Operational(reason)) => {
                tracing::error!(reason = %reason, "cycle failed");
                let _ = write_status(&status_path, &CycleStatus::degraded("cored", &reason));
            }
        }

        tokio::time::sleep(cycle).await;
    }

    tracing::info!("shutdown requested; stopping");
    watchdog_stop.store(true, std::sync::atomic::Ordering::SeqCst);
    let _ = api_task.await;
    std::process::exit(ExitCode::Success.code());
}

enum CycleError {
    Fatal(String),
    Operational(String),
}

async fn run_cycle(
    correlation: &CorrelationEngine,
    policy: &PolicyEngine,
    mode_store: &Arc<ransomeye_db::PgModeStore>,
) -> Result<(usize, usize), CycleError> {
    let report = correlation.correlate_pending().await.map_err(|e| match e {
        CorrelationError::FatalInvariant(m) => CycleError::Fatal(m),
        CorrelationError::Store(m) => CycleError::Operational(m),
    })?;

    let incidents = correlation
        .store()
        .unresolved_incidents()
        .await
        .map_err(|e| CycleError::Operational(e.to_string()))?;
    let mode = mode_store
        .active_mode()
        .await
        .map_err(|e| CycleError::Operational(e.to_string()))?;
    let policy_report = policy
        .evaluate_pending(&incidents, mode)
        .await
        .map_err(|e| CycleError::Operational(e.to_string()))?;

    Ok((
        report.evidence_linked,
        policy_report.recommendations_stored,
    ))
}
