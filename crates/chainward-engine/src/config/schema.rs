use std::collections::HashSet;

use serde::Deserialize;

use chainward_core::error::{ChainwardError, Result};
use chainward_core::PolicySpec;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub version: u32,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub logging: LoggingSection,

    #[serde(default)]
    pub control_plane: ControlPlaneSection,

    /// Routes installed at boot, before the control plane is consulted.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(ChainwardError::UnsupportedVersion);
        }

        self.server.validate()?;
        self.logging.validate()?;
        self.control_plane.validate()?;
        validate_routes(&self.routes)?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// Unix socket shared with the co-located proxy.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Optional TCP address for `/healthz`, `/readyz`, `/metrics`, `/routes`.
    #[serde(default)]
    pub admin_listen: Option<String>,

    /// Filter-metadata namespace holding the matched route's fields.
    #[serde(default = "default_route_metadata_namespace")]
    pub route_metadata_namespace: String,

    /// Dynamic-metadata namespace the kernel writes analytics and path into.
    #[serde(default = "default_engine_namespace")]
    pub engine_namespace: String,

    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            admin_listen: None,
            route_metadata_namespace: default_route_metadata_namespace(),
            engine_namespace: default_engine_namespace(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        if self.socket_path.trim().is_empty() {
            return Err(ChainwardError::Config("server.socket_path must not be empty".into()));
        }
        if let Some(addr) = &self.admin_listen {
            addr.parse::<std::net::SocketAddr>().map_err(|e| {
                ChainwardError::Config(format!("server.admin_listen is not a socket address: {e}"))
            })?;
        }
        if self.route_metadata_namespace.is_empty() || self.engine_namespace.is_empty() {
            return Err(ChainwardError::Config("server namespaces must not be empty".into()));
        }
        if !(64 * 1024..=64 * 1024 * 1024).contains(&self.max_message_bytes) {
            return Err(ChainwardError::Config(
                "server.max_message_bytes must be between 64KiB and 64MiB".into(),
            ));
        }
        Ok(())
    }
}

fn default_socket_path() -> String {
    "/var/run/chainward/extproc.sock".into()
}
fn default_route_metadata_namespace() -> String {
    "chainward.route".into()
}
fn default_engine_namespace() -> String {
    "chainward.policy_engine".into()
}
fn default_max_message_bytes() -> usize {
    4 * 1024 * 1024
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingSection {
    pub fn validate(&self) -> Result<()> {
        if self.filter.trim().is_empty() {
            return Err(ChainwardError::Config("logging.filter must not be empty".into()));
        }
        Ok(())
    }
}

fn default_log_filter() -> String {
    "info".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlPlaneSection {
    /// YAML document with a full route table; re-applied whenever it changes.
    #[serde(default)]
    pub routes_file: Option<String>,

    #[serde(default = "default_reload_interval_ms")]
    pub reload_interval_ms: u64,
}

impl Default for ControlPlaneSection {
    fn default() -> Self {
        Self {
            routes_file: None,
            reload_interval_ms: default_reload_interval_ms(),
        }
    }
}

impl ControlPlaneSection {
    pub fn validate(&self) -> Result<()> {
        if !(500..=600_000).contains(&self.reload_interval_ms) {
            return Err(ChainwardError::Config(
                "control_plane.reload_interval_ms must be between 500 and 600000".into(),
            ));
        }
        Ok(())
    }
}

fn default_reload_interval_ms() -> u64 {
    5000
}

/// One route key and its ordered policies.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    pub key: String,
    #[serde(default)]
    pub policies: Vec<PolicySpec>,
}

/// Standalone routes document served by the control plane.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutesDocument {
    pub version: u32,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl RoutesDocument {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(ChainwardError::UnsupportedVersion);
        }
        validate_routes(&self.routes)
    }
}

pub fn validate_routes(routes: &[RouteConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for r in routes {
        if r.key.trim().is_empty() {
            return Err(ChainwardError::Config("route key must not be empty".into()));
        }
        if !seen.insert(r.key.as_str()) {
            return Err(ChainwardError::Config(format!("duplicate route key: {}", r.key)));
        }
        for p in &r.policies {
            if p.name.is_empty() || p.version.is_empty() {
                return Err(ChainwardError::Config(format!(
                    "route {}: policy name and version are required",
                    r.key
                )));
            }
        }
    }
    Ok(())
}
