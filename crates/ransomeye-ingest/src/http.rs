//! The ingest HTTP surface
//!
//! `POST /events` accepts one envelope per request behind service-to-service
//! bearer auth (pipeline check 1). `GET /health` and `GET /health/metrics`
//! expose aggregate operational telemetry only.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use ransomeye_types::EventEnvelope;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::{IngestMetrics, IngestOutcome, IngestPipeline};

/// Shared state behind the router
pub struct AppState {
    pub pipeline: IngestPipeline,
    pub metrics: IngestMetrics,
    /// Service-to-service bearer token agents must present
    pub auth_token: String,
}

/// Build the ingest router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/events", post(ingest_event))
        .route("/health", get(health))
        .route("/health/metrics", get(health_metrics))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn authorized(headers: &HeaderMap, expected: &str) -> bool {
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return false;
    };
    let Ok(value) = value.to_str() else {
        return false;
    };
    match value.strip_prefix("Bearer ") {
        Some(token) => token == expected,
        None => false,
    }
}

async fn ingest_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Json<Value>,
) -> Response {
    // 1. service-to-service auth
    if !authorized(&headers, &state.auth_token) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error_code": "UNAUTHORIZED"})),
        )
            .into_response();
    }

    // typed parse; unknown fields and malformed values stop here
    let envelope: EventEnvelope = match serde_json::from_value(body.0) {
        Ok(envelope) => envelope,
        Err(e) => {
            state.metrics.record_rejected();
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error_code": "SCHEMA_VALIDATION_FAILED",
                    "validation_details": {"error": e.to_string()},
                })),
            )
                .into_response();
        }
    };

    let write_started = Instant::now();
    match state.pipeline.ingest(envelope).await {
        Ok(IngestOutcome::Accepted { event_id }) => {
            state
                .metrics
                .record_accepted(write_started.elapsed().as_millis() as u64);
            (
                StatusCode::CREATED,
                Json(json!({"event_id": event_id, "status": "accepted"})),
            )
                .into_response()
        }
        Ok(IngestOutcome::Rejected {
            event_id,
            error_code,
            http_status,
            details,
            ..
        }) => {
            state.metrics.record_rejected();
            let status =
                StatusCode::from_u16(http_status).unwrap_or(StatusCode::BAD_REQUEST);
            (
                status,
                Json(json!({
                    "event_id": event_id,
                    "error_code": error_code,
                    "validation_details": details,
                })),
            )
                .into_response()
        }
        Err(e) => {
            state.metrics.record_store_error();
            tracing::error!(error = %e, "ingest store failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error_code": "DB_ERROR"})),
            )
                .into_response()
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.metrics.snapshot();
    Json(json!({"system_status": snapshot.system_status})).into_response()
}

async fn health_metrics(State(state): State<Arc<AppState>>) -> Response {
    Json(state.metrics.snapshot()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryEventStore;
    use ransomeye_crypto::{KeyPair, KeyRegistry, KeyType, PublicKey, VerificationKeys};
    use ransomeye_telemetry::{BuilderIdentity, EnvelopeBuilder, EnvelopeVerifier};
    use ransomeye_types::{BootId, ComponentInstanceId, MachineId};
    use tower::ServiceExt;

    const TOKEN: &str = "service-token-for-tests";

    fn router_with_builder() -> (Router, EnvelopeBuilder, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let keypair = KeyPair::generate();

        let registry = KeyRegistry::open(dir.path().join("registry.json")).unwrap();
        let public = PublicKey::from_keypair(&keypair);
        registry
            .register_key(&public, KeyType::Component, None, Some("linux_agent".into()))
            .unwrap();
        let keys = VerificationKeys::new(dir.path().join("keys"), registry);
        keys.publish(&public).unwrap();

        let builder = EnvelopeBuilder::open(
            BuilderIdentity {
                machine_id: MachineId::new("host-1"),
                component: "linux_agent".to_string(),
                component_instance_id: ComponentInstanceId::new("a-1"),
                hostname: "host-1".to_string(),
                boot_id: BootId::new("boot-1"),
                agent_version: "1.0.0".to_string(),
            },
            keypair,
            dir.path().join("state.json"),
        )
        .unwrap();

        let state = Arc::new(AppState {
            pipeline: IngestPipeline::new(
                EnvelopeVerifier::new(keys),
                Arc::new(MemoryEventStore::new()),
            ),
            metrics: IngestMetrics::new(),
            auth_token: TOKEN.to_string(),
        });

        (create_router(state), builder, dir)
    }

    fn post_request(envelope: &EventEnvelope, token: Option<&str>) -> axum::http::Request<axum::body::Body> {
        let mut builder = axum::http::Request::builder()
            .method("POST")
            .uri("/events")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        builder
            .body(axum::body::Body::from(serde_json::to_vec(envelope).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn accepts_valid_envelope_with_201() {
        let (router, mut builder, _dir) = router_with_builder();
        let envelope = builder
            .build(serde_json::json!({"k": "v"}), "2026-01-10T12:00:00Z".parse().unwrap())
            .unwrap();

        let response = router
            .oneshot(post_request(&envelope, Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn missing_auth_is_401() {
        let (router, mut builder, _dir) = router_with_builder();
        let envelope = builder
            .build(serde_json::json!({}), "2026-01-10T12:00:00Z".parse().unwrap())
            .unwrap();

        let response = router.oneshot(post_request(&envelope, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn duplicate_is_409() {
        let (router, mut builder, _dir) = router_with_builder();
        let envelope = builder
            .build(serde_json::json!({}), "2026-01-10T12:00:00Z".parse().unwrap())
            .unwrap();

        let first = router
            .clone()
            .oneshot(post_request(&envelope, Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = router
            .oneshot(post_request(&envelope, Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn health_is_open_and_sparse() {
        let (router, _builder, _dir) = router_with_builder();
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .method("GET")
                    .uri("/health")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
