#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use chainward_engine::app_state::AppState;
use chainward_engine::builtin::register_builtins;
use chainward_engine::condition::LiteralEvaluator;
use chainward_engine::config::{self, LogFormat};
use chainward_engine::kernel::PolicyRegistry;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
server:
  socket_path: "/tmp/x.sock"
  sockett_mode: 0600 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}

#[test]
fn unknown_policy_field_fails() {
    let bad = r#"
version: 1
routes:
  - key: "r1"
    policies:
      - name: "header-rewrite"
        version: "v1"
        paramz: {}
"#;
    assert!(config::load_from_str(bad).is_err());
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.server.socket_path, "/var/run/chainward/extproc.sock");
    assert_eq!(cfg.server.route_metadata_namespace, "chainward.route");
    assert_eq!(cfg.server.engine_namespace, "chainward.policy_engine");
    assert_eq!(cfg.server.max_message_bytes, 4 * 1024 * 1024);
    assert!(cfg.server.admin_listen.is_none());
    assert_eq!(cfg.logging.filter, "info");
    assert_eq!(cfg.logging.format, LogFormat::Text);
    assert_eq!(cfg.control_plane.reload_interval_ms, 5000);
    assert!(cfg.routes.is_empty());
}

#[test]
fn full_config_parses() {
    let ok = r#"
version: 1
server:
  socket_path: "/run/cw.sock"
  admin_listen: "127.0.0.1:9901"
logging:
  filter: "chainward_engine=debug"
  format: json
routes:
  - key: "pets-list"
    policies:
      - name: "header-rewrite"
        version: "v1"
        condition: "true"
        params:
          request:
            set: { x-env: "prod" }
      - name: "direct-response"
        version: "v1"
        enabled: false
        params: { status: 503 }
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.logging.format, LogFormat::Json);
    let route = &cfg.routes[0];
    assert_eq!(route.policies.len(), 2);
    assert!(route.policies[0].has_condition());
    assert!(!route.policies[1].enabled);
    assert_eq!(route.policies[1].params["status"], 503);
}

#[test]
fn unsupported_version_fails() {
    let err = config::load_from_str("version: 2\n").expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}

#[test]
fn out_of_range_values_fail() {
    for bad in [
        "version: 1\nserver: { max_message_bytes: 1024 }\n",
        "version: 1\nserver: { admin_listen: \"not-an-addr\" }\n",
        "version: 1\nserver: { socket_path: \"  \" }\n",
        "version: 1\ncontrol_plane: { reload_interval_ms: 10 }\n",
        "version: 1\nlogging: { filter: \"\" }\n",
        "version: 1\nlogging: { format: xml }\n",
    ] {
        assert!(config::load_from_str(bad).is_err(), "accepted: {bad}");
    }
}

#[test]
fn duplicate_route_keys_fail() {
    let bad = r#"
version: 1
routes:
  - key: "r1"
  - key: "r1"
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert!(err.to_string().contains("duplicate route key"));
}

#[test]
fn routes_document_is_strict_too() {
    assert!(config::load_routes_from_str("version: 1\nroutes: []\n").is_ok());
    assert!(config::load_routes_from_str("version: 1\nroute: []\n").is_err());
    assert!(config::load_routes_from_str("version: 1\nroutes:\n  - key: \"\"\n").is_err());
}

#[test]
fn inline_routes_and_routes_file_are_exclusive() {
    let cfg = config::load_from_str(
        r#"
version: 1
control_plane:
  routes_file: "/etc/chainward/routes.yaml"
routes:
  - key: "r1"
"#,
    )
    .expect("parses on its own");

    let err = AppState::new(cfg, PolicyRegistry::new(), Arc::new(LiteralEvaluator))
        .err()
        .expect("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}

#[test]
fn inline_routes_are_installed_at_boot() {
    let cfg = config::load_from_str(
        r#"
version: 1
routes:
  - key: "r1"
    policies:
      - { name: "header-rewrite", version: "v1" }
  - key: "r2"
"#,
    )
    .unwrap();
    let registry = PolicyRegistry::new();
    register_builtins(&registry);

    let app = AppState::new(cfg, registry, Arc::new(LiteralEvaluator)).unwrap();
    assert_eq!(app.kernel().route_keys(), vec!["r1".to_string(), "r2".to_string()]);
    assert_eq!(app.kernel().get_policy_chain_for_key("r1").unwrap().len(), 1);
}

#[test]
fn inline_route_with_unknown_policy_fails_boot() {
    let cfg = config::load_from_str(
        r#"
version: 1
routes:
  - key: "r1"
    policies:
      - { name: "jwt", version: "v9" }
"#,
    )
    .unwrap();
    assert!(AppState::new(cfg, PolicyRegistry::new(), Arc::new(LiteralEvaluator)).is_err());
}
