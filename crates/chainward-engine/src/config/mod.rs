//! Engine config loader (strict parsing).

pub mod schema;

use std::fs;

use chainward_core::error::{ChainwardError, Result};

pub use schema::{
    ControlPlaneSection, EngineConfig, LogFormat, LoggingSection, RouteConfig, RoutesDocument,
    ServerSection,
};

pub fn load_from_file(path: &str) -> Result<EngineConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| ChainwardError::Config(format!("read config {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<EngineConfig> {
    let cfg: EngineConfig = serde_yaml::from_str(s)
        .map_err(|e| ChainwardError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn load_routes_from_str(s: &str) -> Result<RoutesDocument> {
    let doc: RoutesDocument = serde_yaml::from_str(s)
        .map_err(|e| ChainwardError::Config(format!("invalid routes yaml: {e}")))?;
    doc.validate()?;
    Ok(doc)
}
