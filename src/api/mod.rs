use crate::engine::EngineHandle;
use axum::Router;
use axum::routing::{get, post};

pub mod handlers;
pub mod responses;

pub fn router(handle: EngineHandle) -> Router {
    Router::new()
        .route("/api/range", get(handlers::get_range))
        .route("/api/stats", get(handlers::get_stats))
        .route("/api/reset", post(handlers::post_reset))
        .route("/api/telemetry", post(handlers::post_telemetry))
        .with_state(handle)
}
