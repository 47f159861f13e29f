use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/solutions", post(handlers::submit_solution))
        .route("/solutions/:solution_id", get(handlers::get_solution))
        .route("/solutions/:solution_id/regrade", post(handlers::regrade_solution))
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
}
