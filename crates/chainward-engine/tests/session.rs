//! End-to-end phase handling through `StreamSession`.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::Arc;

use prost::Message;

use chainward_core::{
    AnalyticsHeaderFilter, DownstreamResponseModifications, ImmediateResponse, PhaseMode,
    ProcessingMode, RequestAction, ResponseAction, UpstreamRequestModifications,
};
use chainward_engine::app_state::AppState;
use chainward_engine::proto::{
    header_value_option::HeaderAppendAction,
    processing_mode::{BodySendMode, HeaderSendMode},
    processing_request, processing_response, HttpTrailers, ProcessingRequest,
};
use chainward_engine::transport::StreamSession;

use common::{
    app, as_struct, chain, common, is_plain_continue, metadata_field, removed_headers, request_body, request_headers,
    response_body, response_headers, set_headers, Spy,
};

fn install(app: &AppState, route: &str, policies: Vec<(Arc<Spy>, &str)>) {
    app.kernel().register_route(route, chain(policies));
}

#[test]
fn set_append_remove_across_policies_yields_one_remove() {
    let app = app();
    let p1 = Arc::new(Spy::request(|_| {
        Ok(RequestAction::Modify(UpstreamRequestModifications::new().set_header("x-a", "1")))
    }));
    let p2 = Arc::new(Spy::request(|_| {
        Ok(RequestAction::Modify(UpstreamRequestModifications::new().append_header("x-a", "2")))
    }));
    let p3 = Arc::new(Spy::request(|_| {
        Ok(RequestAction::Modify(UpstreamRequestModifications::new().remove_header("x-a")))
    }));
    install(&app, "r1", vec![(p1, "p1"), (p2, "p2"), (p3, "p3")]);

    let mut s = StreamSession::new(app);
    let resp = s.handle(request_headers("r1", "/pets", &[], true)).unwrap();
    let c = common(&resp);

    assert_eq!(removed_headers(c), vec!["x-a".to_string()]);
    assert!(set_headers(c).is_empty());
}

#[test]
fn unmatched_route_skips_everything() {
    let app = app();
    let mut s = StreamSession::new(app.clone());

    let resp = s.handle(request_headers("nope", "/", &[], false)).unwrap();
    let c = common(&resp);
    assert!(c.header_mutation.is_none());
    assert!(c.body_mutation.is_none());
    assert!(resp.dynamic_metadata.is_none());

    let mode = resp.mode_override.unwrap();
    assert_eq!(mode.response_header_mode, HeaderSendMode::Skip as i32);
    assert_eq!(mode.request_body_mode, BodySendMode::None as i32);
    assert_eq!(mode.response_body_mode, BodySendMode::None as i32);
    assert_eq!(app.metrics().unmatched_routes.get(&[]), 1);

    // a proxy that ignores the override still gets plain continues
    let resp = s.handle(response_headers("200", &[], true)).unwrap();
    assert!(is_plain_continue(&resp));
}

#[test]
fn request_without_route_name_is_unmatched() {
    let app = app();
    let mut s = StreamSession::new(app);
    let mut req = request_headers("r1", "/", &[], true);
    req.attributes.clear();

    let resp = s.handle(req).unwrap();
    assert!(resp.mode_override.is_some());
    assert!(common(&resp).header_mutation.is_none());
}

#[test]
fn analytics_allow_filter_end_to_end() {
    let app = app();
    let p1 = Arc::new(Spy::request(|_| {
        Ok(RequestAction::Modify(
            UpstreamRequestModifications::new()
                .analytics_header_filter(AnalyticsHeaderFilter::allow(["user-agent"])),
        ))
    }));
    install(&app, "r1", vec![(p1, "p1")]);

    let mut s = StreamSession::new(app.clone());
    let resp = s
        .handle(request_headers(
            "r1",
            "/pets",
            &[("user-agent", "curl/8"), ("authorization", "Bearer t")],
            true,
        ))
        .unwrap();

    let ns = app.translator().engine_namespace();
    let analytics = as_struct(metadata_field(&resp, ns, "analytics_data").unwrap()).unwrap();
    let copied = as_struct(&analytics.fields["request_headers"]).unwrap();
    assert_eq!(copied.fields.len(), 1);
    assert!(copied.fields.contains_key("user-agent"));
}

#[test]
fn short_circuit_emits_immediate_response_and_ends_stream() {
    let app = app();
    let p1 = Arc::new(Spy::request(|_| {
        Ok(RequestAction::Respond(
            ImmediateResponse::new(401)
                .header("www-authenticate", "Bearer")
                .body("unauthorized"),
        ))
    }));
    let p2 = Arc::new(Spy::request(|_| Ok(RequestAction::Continue)));
    install(&app, "r1", vec![(p1, "auth"), (p2.clone(), "after")]);

    let mut s = StreamSession::new(app.clone());
    let resp = s.handle(request_headers("r1", "/", &[], true)).unwrap();

    let Some(processing_response::Response::ImmediateResponse(ir)) = resp.response else {
        panic!("expected immediate response");
    };
    assert_eq!(ir.status.unwrap().code, 401);
    assert_eq!(ir.body, b"unauthorized");
    assert_eq!(p2.request_calls(), 0);
    assert!(s.is_finished());
    assert_eq!(app.metrics().short_circuits.get(&[("policy", "auth")]), 1);

    let err = s.handle(response_headers("200", &[], true)).unwrap_err();
    assert_eq!(err.code().as_str(), "PROTOCOL");
}

#[test]
fn replaying_a_request_gives_identical_bytes() {
    let app = app();
    let p1 = Arc::new(Spy::request(|req| {
        Ok(RequestAction::Modify(
            UpstreamRequestModifications::new()
                .set_header("x-path", req.path.clone())
                .append_header("x-b", "1")
                .append_header("x-b", "2")
                .analytics("k", "v")
                .dynamic_metadata("acme.ns", "n", 1),
        ))
    }));
    install(&app, "r1", vec![(p1, "p1")]);

    let input = request_headers("r1", "/pets?x=1", &[("x-request-id", "abc")], true);
    let first = StreamSession::new(app.clone())
        .handle(input.clone())
        .unwrap()
        .encode_to_vec();
    let second = StreamSession::new(app)
        .handle(input)
        .unwrap()
        .encode_to_vec();
    assert_eq!(first, second);
}

#[test]
fn body_chain_waits_for_the_buffered_body() {
    let app = app();
    let p1 = Arc::new(
        Spy::request(|req| {
            let body = req.body.clone().unwrap_or_default();
            let upper = String::from_utf8_lossy(&body).to_uppercase();
            Ok(RequestAction::Modify(UpstreamRequestModifications::new().body(upper)))
        })
        .with_mode(ProcessingMode {
            request_body: PhaseMode::Buffer,
            ..ProcessingMode::REQUEST_HEADERS
        }),
    );
    install(&app, "r1", vec![(p1.clone(), "upper")]);

    let mut s = StreamSession::new(app);
    let resp = s.handle(request_headers("r1", "/echo", &[], false)).unwrap();
    assert_eq!(p1.request_calls(), 0);
    assert!(common(&resp).body_mutation.is_none());
    let mode = resp.mode_override.unwrap();
    assert_eq!(mode.request_body_mode, BodySendMode::Buffered as i32);
    assert_eq!(mode.response_header_mode, HeaderSendMode::Skip as i32);

    // chunks accumulate until end of stream
    let resp = s.handle(request_body(b"hel", false)).unwrap();
    assert!(is_plain_continue(&resp));
    assert_eq!(s.buffered_body_len(), 3);
    let resp = s.handle(request_body(b"lo", true)).unwrap();
    assert_eq!(p1.request_calls(), 1);
    assert_eq!(s.buffered_body_len(), 0);

    let c = common(&resp);
    let lengths: Vec<(String, String, i32)> = set_headers(c)
        .into_iter()
        .filter(|(k, _, _)| k == "content-length")
        .collect();
    assert_eq!(
        lengths,
        vec![(
            "content-length".to_string(),
            "5".to_string(),
            HeaderAppendAction::OverwriteIfExistsOrAdd as i32
        )]
    );
    match c.body_mutation.as_ref().unwrap().mutation.as_ref().unwrap() {
        chainward_engine::proto::body_mutation::Mutation::Body(b) => assert_eq!(b, b"HELLO"),
        other => panic!("unexpected mutation {other:?}"),
    }
}

#[test]
fn bodies_the_chain_never_asked_for_are_not_buffered() {
    let app = app();
    let p1 = Arc::new(Spy::request(|_| {
        Ok(RequestAction::Modify(UpstreamRequestModifications::new().set_header("x-a", "1")))
    }));
    install(&app, "r1", vec![(p1.clone(), "p1")]);

    let mut s = StreamSession::new(app);
    s.handle(request_headers("r1", "/upload", &[], false)).unwrap();
    assert_eq!(p1.request_calls(), 1);

    // proxy streams the body anyway
    for _ in 0..4 {
        let resp = s.handle(request_body(&[0u8; 1024], false)).unwrap();
        assert!(is_plain_continue(&resp));
        assert_eq!(s.buffered_body_len(), 0);
    }
    let resp = s.handle(request_body(b"tail", true)).unwrap();
    assert!(common(&resp).body_mutation.is_none());
    assert_eq!(s.buffered_body_len(), 0);

    s.handle(response_headers("200", &[], false)).unwrap();
    let resp = s.handle(response_body(&[1u8; 2048], false)).unwrap();
    assert!(is_plain_continue(&resp));
    assert_eq!(s.buffered_body_len(), 0);
    s.handle(response_body(b"", true)).unwrap();
    assert_eq!(p1.request_calls(), 1);
    assert_eq!(p1.response_calls(), 0);
}

fn filtered_request_phase() -> Spy {
    Spy::request(|_| {
        Ok(RequestAction::Modify(
            UpstreamRequestModifications::new()
                .analytics_header_filter(AnalyticsHeaderFilter::allow(["user-agent"])),
        ))
    })
    .with_mode(ProcessingMode::HEADERS_ONLY)
}

#[test]
fn request_header_copy_is_omitted_without_a_response_filter() {
    let app = app();
    let p1 = Arc::new(filtered_request_phase().with_response(|_| {
        Ok(ResponseAction::Modify(
            DownstreamResponseModifications::new().analytics("seen", true),
        ))
    }));
    install(&app, "r1", vec![(p1.clone(), "p1")]);
    let ns = app.translator().engine_namespace().to_string();

    let mut s = StreamSession::new(app);
    let resp = s
        .handle(request_headers("r1", "/pets", &[("user-agent", "curl/8")], true))
        .unwrap();
    let analytics = as_struct(metadata_field(&resp, &ns, "analytics_data").unwrap()).unwrap();
    assert!(analytics.fields.contains_key("request_headers"));

    let resp = s
        .handle(response_headers("200", &[("content-type", "application/json")], true))
        .unwrap();
    assert_eq!(p1.response_calls(), 1);
    let analytics = as_struct(metadata_field(&resp, &ns, "analytics_data").unwrap()).unwrap();
    assert!(analytics.fields.contains_key("seen"));
    assert!(!analytics.fields.contains_key("request_headers"));
    assert!(!analytics.fields.contains_key("response_headers"));
}

#[test]
fn response_filter_brings_back_the_request_header_copy() {
    let app = app();
    let p1 = Arc::new(filtered_request_phase().with_response(|_| {
        Ok(ResponseAction::Modify(
            DownstreamResponseModifications::new()
                .analytics_header_filter(AnalyticsHeaderFilter::deny(["set-cookie"])),
        ))
    }));
    install(&app, "r1", vec![(p1, "p1")]);
    let ns = app.translator().engine_namespace().to_string();

    let mut s = StreamSession::new(app);
    s.handle(request_headers(
        "r1",
        "/pets",
        &[("user-agent", "curl/8"), ("authorization", "Bearer t")],
        true,
    ))
    .unwrap();
    let resp = s
        .handle(response_headers(
            "200",
            &[("content-type", "application/json"), ("set-cookie", "sid=1")],
            true,
        ))
        .unwrap();

    let analytics = as_struct(metadata_field(&resp, &ns, "analytics_data").unwrap()).unwrap();
    let req_copy = as_struct(&analytics.fields["request_headers"]).unwrap();
    let names: Vec<&String> = req_copy.fields.keys().collect();
    assert_eq!(names, vec!["user-agent"]);

    let resp_copy = as_struct(&analytics.fields["response_headers"]).unwrap();
    assert!(resp_copy.fields.contains_key("content-type"));
    assert!(!resp_copy.fields.contains_key("set-cookie"));
}

#[test]
fn response_phase_runs_and_sees_request_snapshot() {
    let app = app();
    let p1 = Arc::new(Spy::response(|resp| {
        assert_eq!(resp.request_path, "/pets");
        assert_eq!(resp.status, 503);
        Ok(ResponseAction::Modify(
            DownstreamResponseModifications::new()
                .set_header("retry-after", "5")
                .analytics("upstream_status", i64::from(resp.status)),
        ))
    }));
    install(&app, "r1", vec![(p1.clone(), "p1")]);

    let mut s = StreamSession::new(app.clone());
    let resp = s.handle(request_headers("r1", "/pets", &[], true)).unwrap();
    let mode = resp.mode_override.unwrap();
    assert_eq!(mode.response_header_mode, HeaderSendMode::Send as i32);

    let resp = s.handle(response_headers("503", &[], true)).unwrap();
    assert_eq!(p1.response_calls(), 1);
    assert!(matches!(
        resp.response,
        Some(processing_response::Response::ResponseHeaders(_))
    ));
    let headers = set_headers(common(&resp));
    assert!(headers.iter().any(|(k, v, _)| k == "retry-after" && v == "5"));

    let ns = app.translator().engine_namespace();
    let analytics = as_struct(metadata_field(&resp, ns, "analytics_data").unwrap()).unwrap();
    assert!(analytics.fields.contains_key("upstream_status"));
    assert!(analytics.fields.contains_key("route_name"));
}

#[test]
fn response_body_runs_once_at_end_of_stream() {
    let app = app();
    let p1 = Arc::new(
        Spy::response(|resp| {
            assert_eq!(resp.body.as_deref(), Some(&b"{\"a\":1}"[..]));
            Ok(ResponseAction::Modify(
                DownstreamResponseModifications::new().body("{}"),
            ))
        })
        .with_mode(ProcessingMode {
            response_body: PhaseMode::Buffer,
            ..ProcessingMode::HEADERS_ONLY
        }),
    );
    install(&app, "r1", vec![(p1.clone(), "p1")]);

    let mut s = StreamSession::new(app);
    s.handle(request_headers("r1", "/", &[], true)).unwrap();
    let resp = s.handle(response_headers("200", &[], false)).unwrap();
    assert_eq!(p1.response_calls(), 0);
    assert!(common(&resp).header_mutation.is_none());

    let resp = s.handle(response_body(b"{\"a\":1}", true)).unwrap();
    assert_eq!(p1.response_calls(), 1);
    let headers = set_headers(common(&resp));
    assert!(headers.iter().any(|(k, v, _)| k == "content-length" && v == "2"));
}

#[test]
fn trailers_pass_through() {
    let app = app();
    install(
        &app,
        "r1",
        vec![(Arc::new(Spy::new(ProcessingMode::REQUEST_HEADERS)), "p1")],
    );
    let mut s = StreamSession::new(app);
    s.handle(request_headers("r1", "/", &[], false)).unwrap();

    let resp = s
        .handle(ProcessingRequest {
            request: Some(processing_request::Request::RequestTrailers(HttpTrailers::default())),
            ..Default::default()
        })
        .unwrap();
    assert!(matches!(
        resp.response,
        Some(processing_response::Response::RequestTrailers(_))
    ));
}

#[test]
fn protocol_violations_are_rejected() {
    let app = app();
    install(
        &app,
        "r1",
        vec![(Arc::new(Spy::new(ProcessingMode::HEADERS_ONLY)), "p1")],
    );

    // body before headers
    let mut s = StreamSession::new(app.clone());
    let err = s.handle(request_body(b"x", true)).unwrap_err();
    assert_eq!(err.code().as_str(), "PROTOCOL");

    // duplicate request headers
    let mut s = StreamSession::new(app.clone());
    s.handle(request_headers("r1", "/", &[], true)).unwrap();
    let err = s.handle(request_headers("r1", "/", &[], true)).unwrap_err();
    assert_eq!(err.code().as_str(), "PROTOCOL");

    // request body after end of stream
    let mut s = StreamSession::new(app.clone());
    s.handle(request_headers("r1", "/", &[], true)).unwrap();
    assert!(s.handle(request_body(b"x", true)).is_err());

    // empty message
    let mut s = StreamSession::new(app);
    assert!(s.handle(ProcessingRequest::default()).is_err());
}

#[test]
fn failing_policy_does_not_break_the_stream() {
    let app = app();
    let bad = Arc::new(Spy::request(|_| panic!("policy bug")));
    let good = Arc::new(Spy::request(|_| {
        Ok(RequestAction::Modify(UpstreamRequestModifications::new().set_header("x-ok", "1")))
    }));
    install(&app, "r1", vec![(bad, "bad"), (good, "good")]);

    let mut s = StreamSession::new(app.clone());
    let resp = s.handle(request_headers("r1", "/", &[], true)).unwrap();
    let headers = set_headers(common(&resp));
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].0, "x-ok");
    assert_eq!(
        app.metrics()
            .policy_outcomes
            .get(&[("policy", "bad"), ("result", "error")]),
        1
    );
}
