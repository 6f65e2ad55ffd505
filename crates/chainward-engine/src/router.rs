//! Axum router for the admin listener.

use axum::{routing::get, Router};

use crate::{app_state::AppState, ops};

pub fn build_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/metrics", get(ops::metrics))
        .route("/routes", get(ops::routes))
        .with_state(state)
}
