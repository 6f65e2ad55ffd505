use std::collections::BTreeMap;

use serde::Serialize;

/// Metadata of the route the proxy matched, as attached by the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouteMetadata {
    /// Route name; also the registry key.
    pub route_name: String,
    pub api_id: String,
    pub api_name: String,
    pub api_version: String,
    pub api_context: String,
    pub operation_path: String,
    pub vhost: String,
    /// Fields present in the route metadata that have no dedicated slot.
    pub extra: BTreeMap<String, String>,
}

impl RouteMetadata {
    /// Build from a flat field map, moving well-known keys into their slots.
    pub fn from_fields(route_name: impl Into<String>, mut fields: BTreeMap<String, String>) -> Self {
        let mut take = |k: &str| fields.remove(k).unwrap_or_default();
        let api_id = take("api_id");
        let api_name = take("api_name");
        let api_version = take("api_version");
        let api_context = take("api_context");
        let operation_path = take("operation_path");
        let vhost = take("vhost");
        Self {
            route_name: route_name.into(),
            api_id,
            api_name,
            api_version,
            api_context,
            operation_path,
            vhost,
            extra: fields,
        }
    }
}
