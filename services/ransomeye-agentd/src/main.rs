//! RansomEye Agent Daemon
//!
//! One command-gate serializer, one heartbeat collector loop, one
//! transmission loop draining the telemetry buffer. The gate refuses
//! everything it cannot prove; telemetry leaves the host signed and
//! chained.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use clap::Parser;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ransomeye_agent::{
    AgentAuditLog, ArtifactStore, CachedPolicyStore, CommandGate, CommandRunner,
    HttpCoreProbe, LinuxHostExecutor, RollbackEngine,
};
use ransomeye_common::{
    assert_supervised, exit_config_error, exit_startup_error, secret_from_env,
    spawn_watchdog, watchdog_interval, ConfigLoader, ExitCode, ShutdownHandler,
};
use ransomeye_crypto::{KeyVault, PublicKey};
use ransomeye_telemetry::{
    run_transmission_loop, system_boot_id, BuilderIdentity, EnvelopeBuilder,
    TelemetryBuffer, TelemetrySender,
};
use ransomeye_types::{BootId, ComponentInstanceId, KeyId, MachineId};

/// RansomEye managed-host agent
#[derive(Parser, Debug)]
#[command(name = "ransomeye-agentd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Command-gate bind address
    #[arg(long, env = "RANSOMEYE_AGENT_BIND", default_value = "127.0.0.1:8200")]
    bind: String,

    /// Heartbeat interval in seconds
    #[arg(long, env = "RANSOMEYE_HEARTBEAT_SECONDS", default_value = "30")]
    heartbeat_seconds: u64,

    /// Log level
    #[arg(long, env = "RANSOMEYE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

struct AgentState {
    gate: CommandGate,
    runner: CommandRunner,
    rollback: RollbackEngine,
    /// One command executes at a time; the gate serializer
    execution_lock: Mutex<()>,
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

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting ransomeye-agentd");

    if let Err(e) = assert_supervised() {
        exit_startup_error(&e.to_string());
    }

    let config = match ConfigLoader::new("agent")
        .require("RANSOMEYE_TRE_PUBLIC_KEY", "hex-encoded TRE verification key")
        .require("RANSOMEYE_CORE_HEALTH_URL", "Core health endpoint")
        .require("RANSOMEYE_INGEST_URL", "ingest events endpoint")
        .require("RANSOMEYE_AGENT_STATE_DIR", "agent state directory")
        .require("RANSOMEYE_VAULT_DIR", "encrypted key vault directory")
        .require("RANSOMEYE_AGENT_KEY_ID", "envelope signing key id")
        .require("RANSOMEYE_COMPONENT_INSTANCE_ID", "component instance id")
        .optional("RANSOMEYE_VERSION", "agent version string", Some(env!("CARGO_PKG_VERSION")))
        .load()
    {
        Ok(config) => config,
        Err(e) => exit_config_error(&e.to_string()),
    };

    let service_token = match secret_from_env("RANSOMEYE_SERVICE_TOKEN") {
        Ok(secret) => secret,
        Err(e) => exit_config_error(&e.to_string()),
    };
    let vault_passphrase = match secret_from_env("RANSOMEYE_VAULT_PASSPHRASE") {
        Ok(secret) => secret,
        Err(e) => exit_config_error(&e.to_string()),
    };

    let state_dir = config.get_path("RANSOMEYE_AGENT_STATE_DIR")?;

    // the crypto surface is all-or-nothing at startup: a bad TRE key
    // means no command could ever verify
    let tre_public =
        match PublicKey::from_hex(config.get_required("RANSOMEYE_TRE_PUBLIC_KEY")?) {
            Ok(key) => key,
            Err(e) => exit_startup_error(&format!("invalid TRE public key: {}", e)),
        };
    let tre_key = *tre_public.verifying_key();
    let tre_key_id = tre_public.key_id();

    let hostname = hostname_string();
    let machine_id = MachineId::new(hostname.clone());
    let boot_id = match system_boot_id() {
        Ok(boot_id) => boot_id,
        Err(_) => BootId::new("boot-unknown"),
    };

    let vault = match KeyVault::open(config.get_path("RANSOMEYE_VAULT_DIR")?) {
        Ok(vault) => vault,
        Err(e) => exit_startup_error(&e.to_string()),
    };
    let agent_key_id = KeyId::new(config.get_required("RANSOMEYE_AGENT_KEY_ID")?);
    let agent_keypair = match vault.load_keypair(&agent_key_id, vault_passphrase.expose()) {
        Ok(keypair) => keypair,
        Err(e) => exit_startup_error(&format!("cannot load envelope signing key: {}", e)),
    };

    let builder = match EnvelopeBuilder::open(
        BuilderIdentity {
            machine_id: machine_id.clone(),
            component: "linux_agent".to_string(),
            component_instance_id: ComponentInstanceId::new(
                config.get_required("RANSOMEYE_COMPONENT_INSTANCE_ID")?,
            ),
            hostname,
            boot_id,
            agent_version: config.get_required("RANSOMEYE_VERSION")?.to_string(),
        },
        agent_keypair,
        state_dir.join("chain-state.json"),
    ) {
        Ok(builder) => builder,
        Err(e) => exit_startup_error(&e.to_string()),
    };

    let gate = CommandGate::new(
        tre_key,
        tre_key_id,
        CachedPolicyStore::new(state_dir.join("cached-policy.json")),
        Arc::new(HttpCoreProbe::new(
            config.get_required("RANSOMEYE_CORE_HEALTH_URL")?,
        )),
        match AgentAuditLog::open(state_dir.join("audit.jsonl")) {
            Ok(audit) => audit,
            Err(e) => exit_startup_error(&e.to_string()),
        },
    );

    let executor: Arc<dyn ransomeye_agent::ActionExecutor> = Arc::new(LinuxHostExecutor::new(
        state_dir.join("enforce"),
        state_dir.join("quarantine"),
        machine_id.to_string(),
    ));
    let runner = CommandRunner::new(
        executor.clone(),
        match ArtifactStore::open(state_dir.join("artifacts")) {
            Ok(store) => store,
            Err(e) => exit_startup_error(&e.to_string()),
        },
    );
    let rollback = RollbackEngine::new(
        match ArtifactStore::open(state_dir.join("artifacts")) {
            Ok(store) => store,
            Err(e) => exit_startup_error(&e.to_string()),
        },
        executor,
    );

    let shutdown = ShutdownHandler::new("agent");
    shutdown.install_signal_handlers();
    let watchdog_stop = spawn_watchdog("agent", watchdog_interval());

    // telemetry: heartbeat collector + batching transmission loop
    let buffer = Arc::new(Mutex::new(TelemetryBuffer::new(
        ransomeye_telemetry::DEFAULT_BUFFER_CAPACITY,
        state_dir.join("spillover.jsonl"),
    )));
    let sender = match TelemetrySender::new(
        config.get_required("RANSOMEYE_INGEST_URL")?,
        service_token.expose(),
    ) {
        Ok(sender) => sender,
        Err(e) => exit_startup_error(&e.to_string()),
    };
    tokio::spawn(run_transmission_loop(
        sender,
        buffer.clone(),
        shutdown.flag(),
        Duration::from_secs(5),
    ));
    tokio::spawn(heartbeat_loop(
        builder,
        buffer,
        shutdown.clone(),
        Duration::from_secs(args.heartbeat_seconds.max(1)),
    ));

    let state = Arc::new(AgentState {
        gate,
        runner,
        rollback,
        execution_lock: Mutex::new(()),
    });
    let router = Router::new()
        .route("/commands", post(receive_command))
        .route("/commands/rollback", post(receive_rollback))
        .with_state(state);

    let addr: SocketAddr = args.bind.parse()?;
    tracing::info!(%addr, "command gate listening");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => exit_startup_error(&format!("bind failed: {}", e)),
    };

    let gate_shutdown = shutdown.clone();
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            loop {
                if gate_shutdown.is_shutdown_requested() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        })
        .await;

    watchdog_stop.store(true, Ordering::SeqCst);
    match result {
        Ok(()) => std::process::exit(ExitCode::Success.code()),
        Err(e) => {
            tracing::error!(error = %e, "agent gate failed");
            std::process::exit(ExitCode::RuntimeError.code());
        }
    }
}

fn hostname_string() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string())
}

/// Emit one heartbeat envelope per interval into the buffer
async fn heartbeat_loop(
    mut builder: EnvelopeBuilder,
    buffer: Arc<Mutex<TelemetryBuffer>>,
    shutdown: ShutdownHandler,
    interval: Duration,
) {
    while !shutdown.is_shutdown_requested() {
        let observed_at = chrono::Utc::now();
        match builder.build(json!({"kind": "heartbeat"}), observed_at) {
            Ok(envelope) => {
                if let Err(e) = buffer.lock().await.push(envelope) {
                    tracing::error!(error = %e, "heartbeat buffering failed");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "heartbeat envelope build failed");
            }
        }
        tokio::time::sleep(interval).await;
    }
}

async fn receive_command(
    State(state): State<Arc<AgentState>>,
    Json(wire): Json<Value>,
) -> Response {
    let outcome = match state.gate.receive_command(wire).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // an agent that cannot audit must not act
            tracing::error!(error = %e, "audit write failed; refusing command");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error_code": "AUDIT_FAILURE"})),
            )
                .into_response();
        }
    };

    match outcome {
        Ok(command) => {
            let _serialized = state.execution_lock.lock().await;
            match state.runner.run(&command) {
                Ok(rollback_captured) => (
                    StatusCode::OK,
                    Json(json!({
                        "command_id": command.command_id,
                        "status": "executed",
                        "rollback_captured": rollback_captured,
                    })),
                )
                    .into_response(),
                Err(e) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "command_id": command.command_id,
                        "status": "failed",
                        "detail": e.to_string(),
                    })),
                )
                    .into_response(),
            }
        }
        Err(rejection) => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "status": "rejected",
                "reason": rejection.reason,
                "detail": rejection.detail,
            })),
        )
            .into_response(),
    }
}

async fn receive_rollback(
    State(state): State<Arc<AgentState>>,
    Json(wire): Json<Value>,
) -> Response {
    let outcome = match state.gate.receive_command(wire).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "audit write failed; refusing rollback");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error_code": "AUDIT_FAILURE"})),
            )
                .into_response();
        }
    };

    match outcome {
        Ok(command) => {
            let _serialized = state.execution_lock.lock().await;
            match state.rollback.execute_rollback(&command.rollback_token) {
                Ok(result) => (
                    StatusCode::OK,
                    Json(json!({
                        "command_id": command.command_id,
                        "status": "rolled_back",
                        "outcome": format!("{:?}", result),
                    })),
                )
                    .into_response(),
                Err(e) => (
                    // a missing artifact fails this rollback only
                    StatusCode::CONFLICT,
                    Json(json!({
                        "command_id": command.command_id,
                        "status": "rollback_failed",
                        "detail": e.to_string(),
                    })),
                )
                    .into_response(),
            }
        }
        Err(rejection) => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "status": "rejected",
                "reason": rejection.reason,
                "detail": rejection.detail,
            })),
        )
            .into_response(),
    }
}
