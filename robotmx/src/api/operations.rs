//! Operation submission and state queries.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use shared_types::{OperationHandle, OperationKind, OperationRequest, ServerSnapshot};

use crate::actors::RobotServerMsg;
use crate::api::ApiState;

#[derive(Debug, Serialize)]
pub struct SubmitOperationResponse {
    pub handle: OperationHandle,
    pub operation: &'static str,
    pub kind: OperationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ServerSnapshot>,
}

fn server_unavailable(e: impl std::fmt::Display) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": format!("Robot server RPC failed: {e}") })),
    )
        .into_response()
}

/// POST /operations - submit an operation, answered with its handle
///
/// Queries complete before the response and carry the server state.
/// Everything else is accepted (202) and reports on the update stream.
pub async fn submit_operation(
    State(state): State<ApiState>,
    payload: Result<Json<OperationRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::debug!(error = %rejection.body_text(), "Rejected operation request");
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": rejection.body_text() })),
            )
                .into_response();
        }
    };

    match ractor::call!(state.server, |reply| RobotServerMsg::Submit {
        request,
        reply
    }) {
        Ok(submitted) => {
            let status = match submitted.kind {
                OperationKind::Query => StatusCode::OK,
                OperationKind::Background | OperationKind::Foreground => StatusCode::ACCEPTED,
            };
            let body = SubmitOperationResponse {
                handle: submitted.handle,
                operation: submitted.operation,
                kind: submitted.kind,
                state: submitted.state,
            };
            (status, Json(body)).into_response()
        }
        Err(e) => server_unavailable(e),
    }
}

/// GET /state - full server snapshot
pub async fn get_state(State(state): State<ApiState>) -> Response {
    match ractor::call!(state.server, |reply| RobotServerMsg::GetSnapshot { reply }) {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => server_unavailable(e),
    }
}
