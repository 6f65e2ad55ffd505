//! Analytics and dynamic metadata assembly.

use std::collections::BTreeMap;

use prost_types::{value::Kind, ListValue, Struct, Value as PbValue};
use serde_json::{Map, Value};

use chainward_core::error::{ChainwardError, Result};
use chainward_core::{AnalyticsHeaderFilter, DynamicMetadata, Headers};

pub const ANALYTICS_DATA_KEY: &str = "analytics_data";
pub const PATH_KEY: &str = "path";
pub const REQUEST_HEADERS_KEY: &str = "request_headers";
pub const RESPONSE_HEADERS_KEY: &str = "response_headers";

const MAX_DEPTH: usize = 32;

pub fn json_to_struct(map: &Map<String, Value>) -> Result<Struct> {
    json_map_to_struct(map, 0)
}

fn json_map_to_struct(map: &Map<String, Value>, depth: usize) -> Result<Struct> {
    if depth > MAX_DEPTH {
        return Err(ChainwardError::Translation(format!(
            "metadata nested deeper than {MAX_DEPTH}"
        )));
    }
    let mut fields = BTreeMap::new();
    for (k, v) in map {
        fields.insert(k.clone(), json_to_value(v, depth + 1)?);
    }
    Ok(Struct { fields })
}

fn json_to_value(v: &Value, depth: usize) -> Result<PbValue> {
    let kind = match v {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(*b),
        Value::Number(n) => Kind::NumberValue(n.as_f64().ok_or_else(|| {
            ChainwardError::Translation(format!("number {n} is not representable"))
        })?),
        Value::String(s) => Kind::StringValue(s.clone()),
        Value::Array(items) => {
            if depth > MAX_DEPTH {
                return Err(ChainwardError::Translation(format!(
                    "metadata nested deeper than {MAX_DEPTH}"
                )));
            }
            let values = items
                .iter()
                .map(|i| json_to_value(i, depth + 1))
                .collect::<Result<Vec<_>>>()?;
            Kind::ListValue(ListValue { values })
        }
        Value::Object(m) => Kind::StructValue(json_map_to_struct(m, depth)?),
    };
    Ok(PbValue { kind: Some(kind) })
}

/// Copy raw headers into a JSON object, honoring a drop filter.
///
/// `allow` keeps only listed headers that are present, `deny` keeps
/// everything else. Any other mode passes everything through.
pub fn filtered_headers(headers: &Headers, filter: &AnalyticsHeaderFilter) -> Value {
    let listed = |name: &str| filter.headers.iter().any(|h| h.eq_ignore_ascii_case(name));
    let allow = match filter.mode.to_ascii_lowercase().as_str() {
        "allow" => Some(true),
        "deny" => Some(false),
        other => {
            tracing::warn!(mode = %other, "unknown analytics header filter mode; passing all headers");
            None
        }
    };

    let mut out = Map::new();
    for (name, value) in headers.iter() {
        let keep = match allow {
            Some(true) => listed(name),
            Some(false) => !listed(name),
            None => true,
        };
        if !keep {
            continue;
        }
        // repeated headers are joined the way proxies fold them
        match out.get_mut(name) {
            Some(Value::String(existing)) => {
                existing.push(',');
                existing.push_str(value);
            }
            _ => {
                out.insert(name.to_string(), Value::String(value.to_string()));
            }
        }
    }
    Value::Object(out)
}

/// Assemble the dynamic metadata struct: the engine namespace (analytics
/// and effective path) plus every policy namespace. A namespace that fails
/// to convert is logged and left out.
pub fn build_dynamic_metadata(
    engine_namespace: &str,
    analytics: &Map<String, Value>,
    path: &str,
    dynamic: &DynamicMetadata,
) -> Option<Struct> {
    let mut namespaces: BTreeMap<String, Map<String, Value>> = dynamic.clone();

    let engine = namespaces.entry(engine_namespace.to_string()).or_default();
    engine.insert(ANALYTICS_DATA_KEY.into(), Value::Object(analytics.clone()));
    engine.insert(PATH_KEY.into(), Value::String(path.to_string()));

    let mut fields = BTreeMap::new();
    for (ns, map) in &namespaces {
        match json_to_struct(map) {
            Ok(s) => {
                fields.insert(
                    ns.clone(),
                    PbValue {
                        kind: Some(Kind::StructValue(s)),
                    },
                );
            }
            Err(e) => {
                tracing::warn!(namespace = %ns, error = %e, "dropping dynamic metadata namespace");
            }
        }
    }

    if fields.is_empty() {
        None
    } else {
        Some(Struct { fields })
    }
}
