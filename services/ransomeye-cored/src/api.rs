//! The TRE HTTP surface
//!
//! Thin layer over the enforcement pipeline: requests in, pipeline
//! verdicts out. No decision logic lives here.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use ransomeye_tre::{ActionRequest, EnforcementPipeline, ModeManager};
use ransomeye_types::{
    ActionId, ApprovalId, BlastScope, CommandTarget, DecisionOutcome, IncidentId,
    PolicyId, Role, TreMode, UserId,
};

pub struct TreApiState {
    pub pipeline: Arc<EnforcementPipeline>,
    pub mode_manager: Arc<ModeManager>,
}

pub fn create_router(state: Arc<TreApiState>) -> Router {
    Router::new()
        .route("/tre/actions", post(execute_action))
        .route("/tre/actions/:action_id/rollback", post(rollback_action))
        .route("/tre/approvals/:approval_id/decision", post(decide_approval))
        .route("/tre/mode", post(change_mode))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ExecuteActionBody {
    action_id: Option<ActionId>,
    action_type: ransomeye_types::ActionType,
    incident_id: Option<IncidentId>,
    target: CommandTarget,
    blast_scope: BlastScope,
    #[serde(default)]
    emergency: bool,
    user_id: UserId,
    user_role: Role,
    policy_id: PolicyId,
    policy_version: String,
}

fn decision_response(status: StatusCode, decision: &DecisionOutcome, body: serde_json::Value) -> Response {
    match decision {
        DecisionOutcome::Allow => (status, Json(body)).into_response(),
        DecisionOutcome::Deny { reason, rule_id } => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "outcome": "DENY",
                "rule_id": rule_id,
                "reason": reason,
            })),
        )
            .into_response(),
    }
}

async fn execute_action(
    State(state): State<Arc<TreApiState>>,
    Json(body): Json<ExecuteActionBody>,
) -> Response {
    let request = ActionRequest {
        action_id: body.action_id,
        action_type: body.action_type,
        incident_id: body.incident_id,
        target: body.target,
        blast_scope: body.blast_scope,
        emergency: body.emergency,
        user_id: body.user_id,
        user_role: body.user_role,
        policy_id: body.policy_id,
        policy_version: body.policy_version,
    };

    match state.pipeline.execute(request).await {
        Ok(result) => decision_response(
            StatusCode::OK,
            &result.decision,
            json!({
                "action_id": result.action_id,
                "executed": result.executed,
                "simulated": result.simulated,
                "approval_id": result.approval_id,
                "execution_status": result.execution_status,
                "command_id": result.command_id,
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "pipeline failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error_code": "PIPELINE_ERROR"})),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct RollbackBody {
    user_id: UserId,
    user_role: Role,
}

async fn rollback_action(
    State(state): State<Arc<TreApiState>>,
    Path(action_id): Path<ActionId>,
    Json(body): Json<RollbackBody>,
) -> Response {
    match state
        .pipeline
        .rollback(&action_id, &body.user_id, body.user_role)
        .await
    {
        Ok(result) => decision_response(
            StatusCode::OK,
            &result.decision,
            json!({
                "action_id": result.action_id,
                "execution_status": result.execution_status,
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "rollback failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error_code": "PIPELINE_ERROR"})),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApprovalDecisionBody {
    action_id: ActionId,
    approver_user_id: UserId,
    approver_role: Role,
    approve: bool,
}

async fn decide_approval(
    State(state): State<Arc<TreApiState>>,
    Path(approval_id): Path<ApprovalId>,
    Json(body): Json<ApprovalDecisionBody>,
) -> Response {
    let result = ransomeye_tre::decide_approval(
        state.pipeline.approvals().as_ref(),
        &approval_id,
        &body.action_id,
        body.approver_user_id,
        body.approver_role,
        body.approve,
        chrono::Utc::now(),
    )
    .await;

    match result {
        Ok(approval) => (
            StatusCode::OK,
            Json(json!({
                "approval_id": approval.approval_id,
                "approval_status": approval.approval_status,
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::CONFLICT,
            Json(json!({"error_code": "APPROVAL_ERROR", "detail": e.to_string()})),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ChangeModeBody {
    user_id: UserId,
    mode: TreMode,
    reason: Option<String>,
}

async fn change_mode(
    State(state): State<Arc<TreApiState>>,
    Json(body): Json<ChangeModeBody>,
) -> Response {
    match state
        .mode_manager
        .change_mode(&body.user_id, body.mode, body.reason)
        .await
    {
        Ok(decision) => decision_response(
            StatusCode::OK,
            &decision,
            json!({"mode": body.mode, "outcome": "ALLOW"}),
        ),
        Err(e) => {
            tracing::error!(error = %e, "mode change failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error_code": "MODE_ERROR"})),
            )
                .into_response()
        }
    }
}
