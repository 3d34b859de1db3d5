//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that every policy reference resolves in the registry
//! - Validate listener and admin settings
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function of the config (and registry); nothing is mutated
//! - Runs before any chain is built or any table is touched

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{KernelConfig, RouteConfig};
use crate::policy::registry::PolicyRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("routes[{index}]: route_key is required")]
    MissingRouteKey { index: usize },

    #[error("route '{route_key}': policy #{index} name is required")]
    MissingPolicyName { route_key: String, index: usize },

    #[error("route '{route_key}': policy '{policy}' version is required")]
    MissingPolicyVersion { route_key: String, policy: String },

    #[error("route '{route_key}': unknown policy '{policy}' version '{version}'")]
    UnknownPolicy {
        route_key: String,
        policy: String,
        version: String,
    },

    #[error("route '{route_key}': no factory registered for policy '{policy}' version '{version}'")]
    MissingFactory {
        route_key: String,
        policy: String,
        version: String,
    },

    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("listener.max_connections must be greater than zero")]
    ZeroConnections,

    #[error("listener.max_frame_bytes must be greater than zero")]
    ZeroFrameLimit,

    #[error("admin.api_key is required when the admin API is enabled")]
    MissingAdminKey,
}

/// Validate the non-route sections of the config.
pub fn validate_config(config: &KernelConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroConnections);
    }
    if config.listener.max_frame_bytes == 0 {
        errors.push(ValidationError::ZeroFrameLimit);
    }
    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::MissingAdminKey);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate every route entry against the registry.
pub fn validate_routes(routes: &[RouteConfig], registry: &PolicyRegistry) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (index, route) in routes.iter().enumerate() {
        if route.route_key.trim().is_empty() {
            errors.push(ValidationError::MissingRouteKey { index });
        }

        for (policy_index, policy) in route.policies.iter().enumerate() {
            if policy.name.is_empty() {
                errors.push(ValidationError::MissingPolicyName {
                    route_key: route.route_key.clone(),
                    index: policy_index,
                });
                continue;
            }
            if policy.version.is_empty() {
                errors.push(ValidationError::MissingPolicyVersion {
                    route_key: route.route_key.clone(),
                    policy: policy.name.clone(),
                });
                continue;
            }
            if registry.get_definition(&policy.name, &policy.version).is_err() {
                errors.push(ValidationError::UnknownPolicy {
                    route_key: route.route_key.clone(),
                    policy: policy.name.clone(),
                    version: policy.version.clone(),
                });
            } else if registry.get_factory(&policy.name, &policy.version).is_err() {
                errors.push(ValidationError::MissingFactory {
                    route_key: route.route_key.clone(),
                    policy: policy.name.clone(),
                    version: policy.version.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
