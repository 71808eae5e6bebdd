//! RansomEye Ingest Daemon
//!
//! The telemetry gateway: multi-threaded request handling over a bounded
//! database pool, one validation pipeline, no background workers. Refuses
//! to start unsupervised or with weak database credentials.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ransomeye_common::{
    assert_supervised, exit_config_error, exit_startup_error, secret_from_env,
    spawn_watchdog, watchdog_interval, ConfigLoader, ExitCode, ShutdownHandler,
};
use ransomeye_crypto::{KeyRegistry, VerificationKeys};
use ransomeye_db::{Database, DatabaseConfig};
use ransomeye_ingest::{create_router, AppState, IngestMetrics, IngestPipeline};
use ransomeye_telemetry::EnvelopeVerifier;

/// RansomEye ingest daemon
#[derive(Parser, Debug)]
#[command(name = "ransomeye-ingestd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host to bind to
    #[arg(long, env = "RANSOMEYE_INGEST_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "RANSOMEYE_INGEST_PORT", default_value = "8000")]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
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

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting ransomeye-ingestd");

    if let Err(e) = assert_supervised() {
        exit_startup_error(&e.to_string());
    }

    // every required variable fails startup when absent
    let config = match ConfigLoader::new("ingest")
        .require("RANSOMEYE_DB_HOST", "PostgreSQL host")
        .require("RANSOMEYE_DB_PORT", "PostgreSQL port")
        .require("RANSOMEYE_DB_NAME", "database name")
        .require("RANSOMEYE_INGEST_DB_USER", "per-service database user")
        .require("RANSOMEYE_COMPONENT_KEY_DIR", "component public-key directory")
        .require("RANSOMEYE_KEY_REGISTRY_PATH", "key registry file")
        .optional("RANSOMEYE_INGEST_HOST", "bind host", Some("127.0.0.1"))
        .load()
    {
        Ok(config) => config,
        Err(e) => exit_config_error(&e.to_string()),
    };

    let db_password = match secret_from_env("RANSOMEYE_INGEST_DB_PASSWORD") {
        Ok(secret) => secret,
        Err(e) => exit_config_error(&e.to_string()),
    };
    let auth_token = match secret_from_env("RANSOMEYE_SERVICE_TOKEN") {
        Ok(secret) => secret,
        Err(e) => exit_config_error(&e.to_string()),
    };

    tracing::debug!(config = %config.redacted_dump(), "loaded configuration");

    let db_config = match DatabaseConfig::for_service(
        config.get_required("RANSOMEYE_DB_HOST")?,
        config.get_port("RANSOMEYE_DB_PORT")?,
        config.get_required("RANSOMEYE_DB_NAME")?,
        config.get_required("RANSOMEYE_INGEST_DB_USER")?,
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

    // verifier initialization is all-or-nothing: a missing registry means
    // no envelope can ever be accepted, so refuse to start
    let registry = match KeyRegistry::open(config.get_path("RANSOMEYE_KEY_REGISTRY_PATH")?) {
        Ok(registry) => registry,
        Err(e) => exit_startup_error(&e.to_string()),
    };
    let keys = VerificationKeys::new(
        config.get_path("RANSOMEYE_COMPONENT_KEY_DIR")?,
        registry,
    );

    let state = Arc::new(AppState {
        pipeline: IngestPipeline::new(
            EnvelopeVerifier::new(keys),
            Arc::new(database.event_store()),
        ),
        metrics: IngestMetrics::new(),
        auth_token: auth_token.expose().to_string(),
    });

    let shutdown = ShutdownHandler::new("ingest");
    shutdown.install_signal_handlers();
    let watchdog_stop = spawn_watchdog("ingest", watchdog_interval());

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    tracing::info!(%addr, "ingest gateway listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => exit_startup_error(&format!("bind failed: {}", e)),
    };

    let shutdown_flag = shutdown.clone();
    let result = axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            loop {
                if shutdown_flag.is_shutdown_requested() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
        })
        .await;

    watchdog_stop.store(true, std::sync::atomic::Ordering::SeqCst);

    match result {
        Ok(()) => {
            tracing::info!("ingest gateway stopped");
            std::process::exit(ExitCode::Success.code());
        }
        Err(e) => {
            tracing::error!(error = %e, "ingest gateway failed");
            std::process::exit(ExitCode::RuntimeError.code());
        }
    }
}
