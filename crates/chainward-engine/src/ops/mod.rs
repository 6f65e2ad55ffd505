//! Operational HTTP endpoints.
//!
//! - `/healthz` : liveness
//! - `/readyz`  : readiness (503 when draining)
//! - `/metrics` : Prometheus text format
//! - `/routes`  : installed route keys and their chains, as JSON

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use chainward_core::PhaseMode;

use crate::app_state::AppState;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.is_draining() {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    } else {
        (StatusCode::OK, "ready")
    }
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    let extra = state.metrics_extra();
    let body = state.metrics().render(&extra);

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

pub async fn routes(State(state): State<AppState>) -> Json<Value> {
    let table = state.kernel().snapshot();
    let mut keys: Vec<&String> = table.keys().collect();
    keys.sort();

    let routes: Vec<Value> = keys
        .into_iter()
        .filter_map(|k| table.get(k).map(|chain| (k, chain)))
        .map(|(key, chain)| {
            let mode = chain.mode();
            let policies: Vec<Value> = chain
                .entries()
                .iter()
                .map(|e| {
                    json!({
                        "name": e.spec.name,
                        "version": e.spec.version,
                        "enabled": e.spec.enabled,
                        "conditional": e.spec.has_condition(),
                    })
                })
                .collect();
            json!({
                "key": key,
                "policies": policies,
                "mode": {
                    "request_headers": phase_label(mode.request_headers),
                    "request_body": phase_label(mode.request_body),
                    "response_headers": phase_label(mode.response_headers),
                    "response_body": phase_label(mode.response_body),
                },
            })
        })
        .collect();

    Json(json!({ "routes": routes }))
}

fn phase_label(m: PhaseMode) -> &'static str {
    match m {
        PhaseMode::Skip => "skip",
        PhaseMode::Process => "process",
        PhaseMode::Buffer => "buffer",
    }
}
