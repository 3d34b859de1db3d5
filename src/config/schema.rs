//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the kernel.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::net::codec::DEFAULT_MAX_FRAME_BYTES;
use crate::policy::chain::{ApiMetadata, PolicySpec};
use crate::value::Map;

/// Root configuration for the policy kernel.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct KernelConfig {
    /// Listener for the JSON-lines processing transport.
    pub listener: ListenerConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    /// Route key → policy chain definitions.
    pub routes: Vec<RouteConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:9001").
    pub bind_address: String,

    /// Maximum concurrent streams (backpressure).
    pub max_connections: usize,

    /// Longest accepted inbound frame, in bytes.
    pub max_frame_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:9001".to_string(),
            max_connections: 10_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // Placeholder, must be replaced before enabling.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:9002".to_string(),
        }
    }
}

/// API identity injected into every policy built for a route.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub id: String,
    pub name: String,
    pub version: String,
}

/// One route and its ordered policies.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Route identifier assigned by the proxy. Required.
    pub route_key: String,

    pub api: Option<ApiConfig>,

    pub policies: Vec<PolicyConfig>,
}

impl RouteConfig {
    pub fn api_metadata(&self) -> Option<ApiMetadata> {
        self.api.as_ref().map(|api| ApiMetadata {
            id: api.id.clone(),
            name: api.name.clone(),
            version: api.version.clone(),
        })
    }

    pub fn specs(&self) -> Vec<PolicySpec> {
        self.policies.iter().map(PolicyConfig::to_spec).collect()
    }
}

/// Reference to a registered policy plus its raw parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub name: String,
    pub version: String,
    pub enabled: bool,
    pub execution_condition: Option<String>,
    pub parameters: Map,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: String::new(),
            enabled: true,
            execution_condition: None,
            parameters: Map::new(),
        }
    }
}

impl PolicyConfig {
    pub fn to_spec(&self) -> PolicySpec {
        PolicySpec {
            name: self.name.clone(),
            version: self.version.clone(),
            enabled: self.enabled,
            execution_condition: self.execution_condition.clone(),
            parameters: self.parameters.clone(),
        }
    }
}
