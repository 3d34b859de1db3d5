//! Configuration loading and application.
//!
//! # Data Flow
//! ```text
//! load_config(path): read → toml parse → validate_config
//! ConfigLoader::apply(routes):
//!     validate_routes (all entries, no lock)
//!     → build every chain into a staging map (no lock)
//!     → RouteTable::replace_all (write lock for the swap only)
//! ```
//!
//! Any failure before the swap leaves the active table untouched.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::config::schema::{KernelConfig, RouteConfig};
use crate::config::validation::{validate_config, validate_routes, ValidationError};
use crate::observability::metrics;
use crate::policy::chain::{ChainBuildError, PolicyChain, PolicyChainBuilder};
use crate::policy::registry::PolicyRegistry;
use crate::routing::RouteTable;

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
    Build(ChainBuildError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
            ConfigError::Build(e) => write!(f, "Chain build failed: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Validation(_) => None,
            ConfigError::Build(e) => Some(e),
        }
    }
}

/// Load a TOML file and validate its non-route sections.
pub fn load_config(path: &Path) -> Result<KernelConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: KernelConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Validates route definitions and swaps them into the [`RouteTable`].
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    registry: Arc<PolicyRegistry>,
    table: Arc<RouteTable>,
}

impl ConfigLoader {
    pub fn new(registry: Arc<PolicyRegistry>, table: Arc<RouteTable>) -> Self {
        Self { registry, table }
    }

    pub fn registry(&self) -> &Arc<PolicyRegistry> {
        &self.registry
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    /// Replace the whole table with `routes`. Returns the number of routes applied.
    pub fn apply(&self, routes: &[RouteConfig]) -> Result<usize, ConfigError> {
        let result = self.stage(routes).map(|staged| {
            let count = staged.len();
            self.table.replace_all(staged);
            count
        });

        match &result {
            Ok(count) => {
                metrics::record_config_reload("ok");
                metrics::set_route_count(*count);
                tracing::info!(routes = count, "Route table replaced");
            }
            Err(e) => {
                metrics::record_config_reload("error");
                tracing::error!(error = %e, "Configuration rejected, keeping active routes");
            }
        }

        result
    }

    /// Load `path` and apply its routes.
    pub fn load_file(&self, path: &Path) -> Result<KernelConfig, ConfigError> {
        let config = match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                metrics::record_config_reload("error");
                tracing::error!(path = %path.display(), error = %e, "Failed to load configuration");
                return Err(e);
            }
        };
        self.apply(&config.routes)?;
        Ok(config)
    }

    fn stage(&self, routes: &[RouteConfig]) -> Result<HashMap<String, Arc<PolicyChain>>, ConfigError> {
        validate_routes(routes, &self.registry).map_err(ConfigError::Validation)?;

        let mut staged = HashMap::with_capacity(routes.len());
        for route in routes {
            let chain = PolicyChainBuilder::new(&self.registry)
                .with_api_metadata(route.api_metadata())
                .build(&route.route_key, route.specs())
                .map_err(ConfigError::Build)?;
            if staged.insert(route.route_key.clone(), Arc::new(chain)).is_some() {
                tracing::warn!(route_key = %route.route_key, "Duplicate route key, last definition wins");
            }
        }
        Ok(staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::PolicyConfig;
    use crate::policy::builtin::register_builtins;
    use std::io::Write;

    fn loader() -> ConfigLoader {
        let mut registry = PolicyRegistry::new();
        register_builtins(&mut registry);
        ConfigLoader::new(Arc::new(registry), Arc::new(RouteTable::new()))
    }

    fn route(key: &str, policy: &str) -> RouteConfig {
        RouteConfig {
            route_key: key.to_string(),
            api: None,
            policies: vec![PolicyConfig {
                name: policy.to_string(),
                version: "v1".to_string(),
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_apply_replaces_table() {
        let loader = loader();
        loader.table().register("stale", Arc::new(
            PolicyChainBuilder::new(loader.registry()).build("stale", Vec::new()).unwrap(),
        ));

        let count = loader.apply(&[route("a", "set-headers"), route("b", "respond")]).unwrap();

        assert_eq!(count, 2);
        assert!(loader.table().get("stale").is_none());
        assert_eq!(loader.table().get("b").unwrap().len(), 1);
    }

    #[test]
    fn test_rejected_config_leaves_table() {
        let loader = loader();
        loader.apply(&[route("a", "set-headers")]).unwrap();

        let err = loader.apply(&[route("b", "set-headers"), route("", "respond")]).unwrap_err();
        assert!(err.to_string().contains("route_key is required"));

        assert!(loader.table().get("a").is_some());
        assert!(loader.table().get("b").is_none());
    }

    #[test]
    fn test_duplicate_route_key_last_wins() {
        let loader = loader();
        loader.apply(&[route("a", "set-headers"), route("a", "respond")]).unwrap();
        let chain = loader.table().get("a").unwrap();
        assert_eq!(chain.specs()[0].name, "respond");
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[routes]]\nroute_key = \"orders\"\n[[routes.policies]]\nname = \"set-headers\"\nversion = \"v1\""
        )
        .unwrap();

        let loader = loader();
        let config = loader.load_file(file.path()).unwrap();
        assert_eq!(config.routes.len(), 1);
        assert!(loader.table().get("orders").is_some());
    }

    #[test]
    fn test_load_file_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[routes]\nroute_key = ").unwrap();
        assert!(matches!(loader().load_file(file.path()), Err(ConfigError::Parse(_))));
    }
}
