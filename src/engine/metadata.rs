//! Route metadata extraction and analytics shaping.
//!
//! # Data Flow
//! ```text
//! event.attributes["envoy.filters.http.ext_proc"]
//!     → "xds.route_name"      (route key used for the RouteTable lookup)
//!     → "xds.route_metadata"  (serialized JSON block: API identity + LLM hints)
//!     → RouteMetadata
//!     → SharedContext seed + analytics metadata
//! ```
//!
//! Analytics and engine-internal metadata leave the kernel as dynamic
//! metadata, one namespace each.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::extproc::types::Attributes;
use crate::value::{AnalyticsValue, Map, Value};

/// Attribute key under which the transport sends route attributes.
pub const EXT_PROC_FILTER: &str = "envoy.filters.http.ext_proc";
pub const ROUTE_NAME_ATTRIBUTE: &str = "xds.route_name";
pub const ROUTE_METADATA_ATTRIBUTE: &str = "xds.route_metadata";

/// Dynamic metadata namespace for analytics.
pub const ANALYTICS_NAMESPACE: &str = "policy_kernel.analytics";
/// Dynamic metadata namespace for metadata emitted by policies.
pub const DYNAMIC_NAMESPACE: &str = "policy_kernel.metadata";

pub const TEMPLATE_HANDLE_KEY: &str = "template_handle";
pub const PROVIDER_NAME_KEY: &str = "provider_name";

/// Per-request route information. Extracted fresh for every stream.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RouteMetadata {
    #[serde(skip)]
    pub route_name: String,
    pub api_id: String,
    pub api_name: String,
    pub api_version: String,
    pub api_context: String,
    pub operation_path: String,
    pub vhost: String,
    pub api_kind: String,
    pub template_handle: Option<String>,
    pub provider_name: Option<String>,
    pub project_id: Option<String>,
}

impl RouteMetadata {
    /// Extract from event attributes. Missing or malformed pieces yield defaults.
    pub fn from_attributes(attributes: &Attributes) -> Self {
        let Some(filter) = attributes.get(EXT_PROC_FILTER).and_then(Value::as_map) else {
            return Self::default();
        };

        let route_name = filter
            .get(ROUTE_NAME_ATTRIBUTE)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut metadata = match filter.get(ROUTE_METADATA_ATTRIBUTE) {
            Some(Value::String(raw)) if !raw.is_empty() => parse_block(&route_name, raw),
            Some(v @ Value::Map(_)) => match serde_json::to_string(v) {
                Ok(raw) => parse_block(&route_name, &raw),
                Err(_) => Self::default(),
            },
            _ => Self::default(),
        };

        metadata.route_name = route_name;
        metadata.template_handle = non_empty(metadata.template_handle);
        metadata.provider_name = non_empty(metadata.provider_name);
        metadata.project_id = non_empty(metadata.project_id);
        metadata
    }

    /// Analytics entries derived solely from the route.
    pub fn analytics(&self) -> BTreeMap<String, AnalyticsValue> {
        let mut out = BTreeMap::new();
        let mut put = |key: &str, value: &str| {
            if !value.is_empty() {
                out.insert(key.to_string(), AnalyticsValue::from(value));
            }
        };
        put("route_name", &self.route_name);
        put("api_id", &self.api_id);
        put("api_name", &self.api_name);
        put("api_version", &self.api_version);
        put("api_context", &self.api_context);
        put("operation_path", &self.operation_path);
        put("vhost", &self.vhost);
        put("api_kind", &self.api_kind);
        put("project_id", self.project_id.as_deref().unwrap_or_default());
        put(TEMPLATE_HANDLE_KEY, self.template_handle.as_deref().unwrap_or_default());
        put(PROVIDER_NAME_KEY, self.provider_name.as_deref().unwrap_or_default());
        out
    }
}

fn parse_block(route_name: &str, raw: &str) -> RouteMetadata {
    match serde_json::from_str(raw) {
        Ok(metadata) => metadata,
        Err(e) => {
            tracing::warn!(route = %route_name, error = %e, "Failed to parse route metadata");
            RouteMetadata::default()
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Assemble namespaced dynamic metadata. `None` when there is nothing to send.
pub fn dynamic_metadata(analytics: &BTreeMap<String, AnalyticsValue>, dynamic: &Map) -> Option<Map> {
    let mut out = Map::new();
    if !analytics.is_empty() {
        let fields: Map = analytics
            .iter()
            .map(|(k, v)| (k.clone(), v.to_structural()))
            .collect();
        out.insert(ANALYTICS_NAMESPACE.to_string(), Value::Map(fields));
    }
    if !dynamic.is_empty() {
        out.insert(DYNAMIC_NAMESPACE.to_string(), Value::Map(dynamic.clone()));
    }
    (!out.is_empty()).then_some(out)
}
