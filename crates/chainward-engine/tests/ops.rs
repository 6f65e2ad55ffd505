#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use chainward_core::{PhaseMode, ProcessingMode};
use chainward_engine::ops;

use common::{app, chain, Spy};

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn readyz_flips_when_draining() {
    let app = app();
    let resp = ops::readyz(State(app.clone())).await.into_response();
    assert_eq!(resp.status(), StatusCode::OK);

    app.set_draining();
    let resp = ops::readyz(State(app.clone())).await.into_response();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_text(resp).await, "draining");

    let resp = ops::healthz().await.into_response();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn metrics_render_engine_series() {
    let app = app();
    app.kernel().register_route("r1", chain(vec![]));
    app.metrics().unmatched_routes.inc(&[]);
    app.metrics()
        .policy_outcomes
        .inc(&[("policy", "auth"), ("result", "ok")]);

    let resp = ops::metrics(State(app)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let text = body_text(resp).await;
    assert!(text.contains("chainward_policy_outcomes_total{policy=\"auth\",result=\"ok\"} 1"), "{text}");
    assert!(text.contains("chainward_unmatched_routes_total"));
    assert!(text.contains("chainward_routes 1"));
    assert!(text.contains("chainward_draining 0"));
}

#[tokio::test]
async fn routes_lists_chains_sorted() {
    let app = app();
    let body = Arc::new(Spy::new(ProcessingMode {
        response_body: PhaseMode::Buffer,
        ..ProcessingMode::HEADERS_ONLY
    }));
    app.kernel().register_route("zeta", chain(vec![]));
    app.kernel().register_route("alpha", chain(vec![(body, "gzip")]));

    let axum::Json(json) = ops::routes(State(app)).await;
    let routes = json["routes"].as_array().unwrap();
    assert_eq!(routes[0]["key"], "alpha");
    assert_eq!(routes[1]["key"], "zeta");
    assert_eq!(routes[0]["policies"][0]["name"], "gzip");
    assert_eq!(routes[0]["policies"][0]["conditional"], false);
    assert_eq!(routes[0]["mode"]["response_body"], "buffer");
    assert_eq!(routes[1]["mode"]["request_headers"], "skip");
}
