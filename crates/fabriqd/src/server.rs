//! HTTP server for fabriqd

use crate::orchestrator::Pipeline;
use crate::routes;
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub start_time: Instant,
    pub collections: usize,
}

impl AppState {
    pub fn new(pipeline: Pipeline, collections: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            start_time: Instant::now(),
            collections,
        }
    }
}

/// Run the HTTP server
pub async fn run(state: AppState, addr: &str) -> Result<()> {
    let state = Arc::new(state);

    let app = Router::new()
        .merge(routes::ask_routes())
        .merge(routes::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(90)));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("  Listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
