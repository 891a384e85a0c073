use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{
    Router,
    routing::{delete, get, post},
};

use super::handlers;
use crate::gateway::Gateway;
use crate::index::CommitIndex;

pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub index: Arc<CommitIndex>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>, index: Arc<CommitIndex>) -> Self {
        Self { gateway, index }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        // Gateway (signed)
        .route("/api/v1/publish", post(handlers::publish))
        .route("/api/v1/repos", get(handlers::list_repos))
        .route("/api/v1/repos/{name}", delete(handlers::release_repo))
        .route("/api/v1/repos/{name}/rename", post(handlers::rename_repo))
        // Index (read-only, public)
        .route("/api/v1/commits", get(handlers::list_commits))
        .route("/api/v1/commits/{message_id}", get(handlers::get_commit))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
