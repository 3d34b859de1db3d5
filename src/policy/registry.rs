//! Policy registry.
//!
//! # Responsibilities
//! - Hold policy definitions (name, version, default init parameters)
//! - Hold factories that construct policy instances
//! - Instantiate a named+versioned policy with merged parameters
//!
//! # Design Decisions
//! - Definitions and factories are registered separately; a policy is only
//!   usable when both exist
//! - Request-time parameters override init parameters key by key
//! - The registry is populated at startup and read-only afterwards

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::policy::types::{Params, Policy, PolicyError};

/// Static description of a policy version.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDefinition {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Defaults merged under the parameters of every instance.
    pub init_parameters: Params,
}

impl PolicyDefinition {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            init_parameters: Params::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_init_parameters(mut self, params: Params) -> Self {
        self.init_parameters = params;
        self
    }
}

/// Identity of the route/API an instance is being built for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyMetadata {
    pub route_key: String,
    pub api_id: String,
    pub api_name: String,
    pub api_version: String,
}

/// Builds policy instances.
pub trait PolicyFactory: Send + Sync {
    fn create(&self, metadata: &PolicyMetadata, params: &Params) -> Result<Arc<dyn Policy>, PolicyError>;
}

impl<F> PolicyFactory for F
where
    F: Fn(&PolicyMetadata, &Params) -> Result<Arc<dyn Policy>, PolicyError> + Send + Sync,
{
    fn create(&self, metadata: &PolicyMetadata, params: &Params) -> Result<Arc<dyn Policy>, PolicyError> {
        self(metadata, params)
    }
}

/// Errors raised while resolving or instantiating a policy.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("policy definition not found: {name} {version}")]
    DefinitionNotFound { name: String, version: String },

    #[error("policy factory not found: {name} {version}")]
    FactoryNotFound { name: String, version: String },

    #[error("failed to create policy {name} {version}: {source}")]
    Instantiation {
        name: String,
        version: String,
        #[source]
        source: PolicyError,
    },
}

type PolicyKey = (String, String);

fn key(name: &str, version: &str) -> PolicyKey {
    (name.to_string(), version.to_string())
}

/// Registry of known policies.
#[derive(Default)]
pub struct PolicyRegistry {
    definitions: HashMap<PolicyKey, PolicyDefinition>,
    factories: HashMap<PolicyKey, Arc<dyn PolicyFactory>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition together with its factory.
    pub fn register<F>(&mut self, definition: PolicyDefinition, factory: F)
    where
        F: PolicyFactory + 'static,
    {
        let k = key(&definition.name, &definition.version);
        self.factories.insert(k.clone(), Arc::new(factory));
        self.definitions.insert(k, definition);
    }

    pub fn register_definition(&mut self, definition: PolicyDefinition) {
        self.definitions
            .insert(key(&definition.name, &definition.version), definition);
    }

    pub fn register_factory<F>(&mut self, name: &str, version: &str, factory: F)
    where
        F: PolicyFactory + 'static,
    {
        self.factories.insert(key(name, version), Arc::new(factory));
    }

    pub fn get_definition(&self, name: &str, version: &str) -> Result<&PolicyDefinition, RegistryError> {
        self.definitions
            .get(&key(name, version))
            .ok_or_else(|| RegistryError::DefinitionNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    pub fn get_factory(&self, name: &str, version: &str) -> Result<Arc<dyn PolicyFactory>, RegistryError> {
        self.factories
            .get(&key(name, version))
            .cloned()
            .ok_or_else(|| RegistryError::FactoryNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    /// Create an instance, returning it with the merged parameter set.
    pub fn create_instance(
        &self,
        name: &str,
        version: &str,
        metadata: &PolicyMetadata,
        raw_params: &Params,
    ) -> Result<(Arc<dyn Policy>, Params), RegistryError> {
        let definition = self.get_definition(name, version)?;
        let factory = self.get_factory(name, version)?;

        let mut merged = definition.init_parameters.clone();
        for (k, v) in raw_params {
            merged.insert(k.clone(), v.clone());
        }

        let policy = factory
            .create(metadata, &merged)
            .map_err(|source| RegistryError::Instantiation {
                name: name.to_string(),
                version: version.to_string(),
                source,
            })?;

        Ok((policy, merged))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl std::fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.definitions.keys().collect();
        keys.sort();
        f.debug_struct("PolicyRegistry")
            .field("definitions", &keys)
            .field("factories", &self.factories.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::types::PolicyMode;
    use crate::value::Value;

    struct Noop;

    impl Policy for Noop {
        fn mode(&self) -> PolicyMode {
            PolicyMode::default()
        }
    }

    fn noop_factory(_: &PolicyMetadata, _: &Params) -> Result<Arc<dyn Policy>, PolicyError> {
        Ok(Arc::new(Noop))
    }

    #[test]
    fn test_create_instance_merges_parameters() {
        let mut init = Params::new();
        init.insert("limit".into(), Value::Number(10.0));
        init.insert("unit".into(), Value::from("minute"));

        let mut registry = PolicyRegistry::new();
        registry.register(
            PolicyDefinition::new("rate-limit", "v1").with_init_parameters(init),
            noop_factory,
        );

        let mut raw = Params::new();
        raw.insert("limit".into(), Value::Number(50.0));

        let (_, merged) = registry
            .create_instance("rate-limit", "v1", &PolicyMetadata::default(), &raw)
            .unwrap();
        assert_eq!(merged["limit"], Value::Number(50.0));
        assert_eq!(merged["unit"], Value::from("minute"));
    }

    #[test]
    fn test_unknown_policy() {
        let registry = PolicyRegistry::new();
        let err = registry
            .create_instance("jwt", "v1", &PolicyMetadata::default(), &Params::new())
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::DefinitionNotFound { .. }));
        assert!(err.to_string().contains("jwt"));
    }

    #[test]
    fn test_definition_without_factory() {
        let mut registry = PolicyRegistry::new();
        registry.register_definition(PolicyDefinition::new("cors", "v2"));

        assert!(registry.get_definition("cors", "v2").is_ok());
        let err = registry.get_factory("cors", "v2").err().unwrap();
        assert!(matches!(err, RegistryError::FactoryNotFound { .. }));
    }

    #[test]
    fn test_factory_failure_is_wrapped() {
        let mut registry = PolicyRegistry::new();
        registry.register(
            PolicyDefinition::new("broken", "v1"),
            |_: &PolicyMetadata, _: &Params| -> Result<Arc<dyn Policy>, PolicyError> {
                Err(PolicyError::Failed("boom".into()))
            },
        );

        let err = registry
            .create_instance("broken", "v1", &PolicyMetadata::default(), &Params::new())
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::Instantiation { .. }));
        assert!(err.to_string().contains("broken"));
    }
}
