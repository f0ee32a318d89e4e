//! Engine Configuration
//!
//! An engine is built from a named YAML configuration resource:
//!
//! ```yaml
//! name: orders
//! id_block_size: 50
//! tenant_check_enabled: true
//! ```
//!
//! Every key is optional. The storage namespace is never read from the
//! resource; the provider assigns a private one per engine.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::harness::resources::ResourceLoader;

/// Conventional name of the configuration resource.
pub const DEFAULT_CONFIGURATION_RESOURCE: &str = "flowtest.cfg.yaml";

/// Default number of ids reserved from storage at a time.
const DEFAULT_ID_BLOCK_SIZE: u64 = 100;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Engine name reported by registrations
    pub name: String,

    /// Ids reserved from storage per block
    pub id_block_size: u64,

    /// Initial value of the runtime tenant check flag
    pub tenant_check_enabled: bool,

    /// Private storage namespace; assigned at build time
    #[serde(skip)]
    pub storage_namespace: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            id_block_size: DEFAULT_ID_BLOCK_SIZE,
            tenant_check_enabled: true,
            storage_namespace: anonymous_namespace(),
        }
    }
}

impl EngineConfig {
    /// Reads a configuration resource through the loader.
    pub fn from_resource(loader: &dyn ResourceLoader, resource: &str) -> Result<Self> {
        let bytes = loader
            .read(resource)
            .ok_or_else(|| HarnessError::ConfigNotFound(resource.to_string()))?;

        let mut config: EngineConfig =
            serde_yaml::from_slice(&bytes).map_err(|source| HarnessError::InvalidConfig {
                resource: resource.to_string(),
                source,
            })?;

        if config.id_block_size == 0 {
            config.id_block_size = DEFAULT_ID_BLOCK_SIZE;
        }
        config.storage_namespace = anonymous_namespace();

        debug!(
            "Loaded engine configuration '{}' from {} (storage {})",
            config.name, resource, config.storage_namespace
        );
        Ok(config)
    }

    /// Replaces the storage namespace.
    pub fn with_storage_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.storage_namespace = namespace.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// A fresh, never reused storage namespace.
pub fn anonymous_namespace() -> String {
    format!("mem:{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::resources::MemoryLoader;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.name, "default");
        assert_eq!(config.id_block_size, 100);
        assert!(config.tenant_check_enabled);
        assert!(config.storage_namespace.starts_with("mem:"));
    }

    #[test]
    fn test_from_resource() {
        let loader = MemoryLoader::new().with(
            DEFAULT_CONFIGURATION_RESOURCE,
            "name: orders\nid_block_size: 10\ntenant_check_enabled: false\n",
        );

        let config = EngineConfig::from_resource(&loader, DEFAULT_CONFIGURATION_RESOURCE).unwrap();

        assert_eq!(config.name, "orders");
        assert_eq!(config.id_block_size, 10);
        assert!(!config.tenant_check_enabled);
    }

    #[test]
    fn test_each_load_gets_own_namespace() {
        let loader = MemoryLoader::new().with("cfg.yaml", "name: a\n");

        let first = EngineConfig::from_resource(&loader, "cfg.yaml").unwrap();
        let second = EngineConfig::from_resource(&loader, "cfg.yaml").unwrap();

        assert_ne!(first.storage_namespace, second.storage_namespace);
    }

    #[test]
    fn test_missing_resource() {
        let loader = MemoryLoader::new();
        let err = EngineConfig::from_resource(&loader, "absent.yaml").unwrap_err();
        assert!(matches!(err, HarnessError::ConfigNotFound(name) if name == "absent.yaml"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let loader = MemoryLoader::new().with("cfg.yaml", "jdbc_url: h2\n");
        let err = EngineConfig::from_resource(&loader, "cfg.yaml").unwrap_err();
        assert!(matches!(err, HarnessError::InvalidConfig { .. }));
    }

    #[test]
    fn test_zero_block_size_falls_back() {
        let loader = MemoryLoader::new().with("cfg.yaml", "id_block_size: 0\n");
        let config = EngineConfig::from_resource(&loader, "cfg.yaml").unwrap();
        assert_eq!(config.id_block_size, 100);
    }
}
