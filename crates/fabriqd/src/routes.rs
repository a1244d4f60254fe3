//! API routes for fabriqd

use crate::server::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use fabriq_common::{AskRequest, AskResponse};
use serde::Serialize;
use std::sync::Arc;

type AppStateArc = Arc<AppState>;

pub fn ask_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/ask", post(ask))
}

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/health", get(health_check))
}

async fn ask(
    State(state): State<AppStateArc>,
    Json(req): Json<AskRequest>,
) -> (StatusCode, Json<AskResponse>) {
    let reply = state.pipeline.ask(&req.question).await;
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(reply.body))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
    uptime_seconds: u64,
    collections: usize,
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        collections: state.collections,
    })
}
