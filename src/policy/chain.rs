//! Compiled policy chains.
//!
//! A [`PolicyChain`] is built once per route from declarative specs and is
//! immutable afterwards. Body-buffering requirements and the presence of
//! execution conditions are computed at build time so that the stream
//! processor never inspects individual policies on the hot path.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::policy::registry::{PolicyMetadata, PolicyRegistry, RegistryError};
use crate::policy::types::{Params, Policy};

/// Declarative policy reference, as found in configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolicySpec {
    pub name: String,
    pub version: String,
    pub enabled: bool,
    /// Conditional-execution expression, evaluated by the chain executor.
    pub execution_condition: Option<String>,
    /// Raw parameters before the build; merged parameters afterwards.
    pub parameters: Params,
}

impl PolicySpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            enabled: true,
            execution_condition: None,
            parameters: Params::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Params) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_condition(mut self, expression: impl Into<String>) -> Self {
        self.execution_condition = Some(expression.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn has_condition(&self) -> bool {
        self.execution_condition
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty())
    }
}

/// API identity injected into each policy's construction metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
}

/// An ordered, compiled set of policies for one route.
pub struct PolicyChain {
    route_key: String,
    policies: Vec<Arc<dyn Policy>>,
    specs: Vec<PolicySpec>,
    requires_request_body: bool,
    requires_response_body: bool,
    has_execution_conditions: bool,
}

impl PolicyChain {
    pub fn route_key(&self) -> &str {
        &self.route_key
    }

    pub fn policies(&self) -> &[Arc<dyn Policy>] {
        &self.policies
    }

    pub fn specs(&self) -> &[PolicySpec] {
        &self.specs
    }

    pub fn requires_request_body(&self) -> bool {
        self.requires_request_body
    }

    pub fn requires_response_body(&self) -> bool {
        self.requires_response_body
    }

    pub fn has_execution_conditions(&self) -> bool {
        self.has_execution_conditions
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl fmt::Debug for PolicyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyChain")
            .field("route_key", &self.route_key)
            .field("specs", &self.specs)
            .field("requires_request_body", &self.requires_request_body)
            .field("requires_response_body", &self.requires_response_body)
            .field("has_execution_conditions", &self.has_execution_conditions)
            .finish()
    }
}

/// Errors raised while compiling a chain. The chain is never partially built.
#[derive(Debug, Error)]
pub enum ChainBuildError {
    #[error("route_key is required")]
    MissingRouteKey,

    #[error("route '{route_key}': policy #{index} name is required")]
    MissingPolicyName { route_key: String, index: usize },

    #[error("route '{route_key}': policy '{policy}' version is required")]
    MissingPolicyVersion { route_key: String, policy: String },

    #[error("route '{route_key}': {source}")]
    Registry {
        route_key: String,
        #[source]
        source: RegistryError,
    },
}

/// Compiles policy specs into a [`PolicyChain`].
pub struct PolicyChainBuilder<'a> {
    registry: &'a PolicyRegistry,
    api: Option<ApiMetadata>,
}

impl<'a> PolicyChainBuilder<'a> {
    pub fn new(registry: &'a PolicyRegistry) -> Self {
        Self { registry, api: None }
    }

    pub fn with_api_metadata(mut self, api: Option<ApiMetadata>) -> Self {
        self.api = api;
        self
    }

    pub fn build(&self, route_key: &str, specs: Vec<PolicySpec>) -> Result<PolicyChain, ChainBuildError> {
        if route_key.is_empty() {
            return Err(ChainBuildError::MissingRouteKey);
        }

        let api = self.api.clone().unwrap_or_default();
        let metadata = PolicyMetadata {
            route_key: route_key.to_string(),
            api_id: api.id,
            api_name: api.name,
            api_version: api.version,
        };

        let mut policies = Vec::with_capacity(specs.len());
        let mut compiled = Vec::with_capacity(specs.len());
        let mut requires_request_body = false;
        let mut requires_response_body = false;
        let mut has_execution_conditions = false;

        for (index, mut spec) in specs.into_iter().enumerate() {
            if spec.name.is_empty() {
                return Err(ChainBuildError::MissingPolicyName {
                    route_key: route_key.to_string(),
                    index,
                });
            }
            if spec.version.is_empty() {
                return Err(ChainBuildError::MissingPolicyVersion {
                    route_key: route_key.to_string(),
                    policy: spec.name,
                });
            }

            let (policy, merged) = self
                .registry
                .create_instance(&spec.name, &spec.version, &metadata, &spec.parameters)
                .map_err(|source| ChainBuildError::Registry {
                    route_key: route_key.to_string(),
                    source,
                })?;

            let mode = policy.mode();
            requires_request_body |= mode.request_body.needs_body();
            requires_response_body |= mode.response_body.needs_body();
            has_execution_conditions |= spec.has_condition();

            spec.parameters = merged;
            policies.push(policy);
            compiled.push(spec);
        }

        tracing::debug!(
            route_key = %route_key,
            policies = policies.len(),
            requires_request_body,
            requires_response_body,
            has_execution_conditions,
            "Policy chain built"
        );

        Ok(PolicyChain {
            route_key: route_key.to_string(),
            policies,
            specs: compiled,
            requires_request_body,
            requires_response_body,
            has_execution_conditions,
        })
    }
}
