//! Axum router construction.

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::routes;

/// Build the monitoring API router.
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/queue/status", get(routes::queue::queue_status))
        .route("/queue/tasks", get(routes::queue::list_tasks))
        .route("/queue/task/{id}", get(routes::queue::get_task))
        .route("/queue/task/{id}/files", get(routes::queue::get_task_files))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
