//! HTTP API routes for the robot server
//!
//! Operations are submitted over HTTP and answered with their handle; their
//! lifecycle and every value change stream out over `/ws/updates`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use ractor::ActorRef;
use serde_json::json;

pub mod operations;
pub mod websocket;

use crate::actors::RobotServerMsg;
use crate::reporter::BroadcastReporter;

#[derive(Clone)]
pub struct ApiState {
    pub server: ActorRef<RobotServerMsg>,
    pub updates: BroadcastReporter,
}

/// Configure all API routes
pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/state", get(operations::get_state))
        .route("/operations", post(operations::submit_operation))
        .route("/ws/updates", get(websocket::updates_websocket))
}

pub async fn health_check(State(_state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "robotmx",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
