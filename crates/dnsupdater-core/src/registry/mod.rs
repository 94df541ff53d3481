//! Plugin-based updater registry
//!
//! Updater crates register their factories under a protocol tag at startup,
//! so dispatch never needs a hardcoded chain of protocol checks.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dnsupdater_core::registry::UpdaterRegistry;
//!
//! let registry = UpdaterRegistry::new();
//! dnsupdater_http::register(&registry);
//! dnsupdater_powerdns::register(&registry);
//!
//! assert!(registry.has_updater("http"));
//! ```
//!
//! ## Registration
//!
//! Implementations register themselves during initialization:
//!
//! ```rust,ignore
//! // In the dnsupdater-powerdns crate
//! pub fn register(registry: &UpdaterRegistry) {
//!     registry.register_updater("powerdns", Box::new(PowerDnsFactory::default()));
//! }
//! ```

use crate::config::Config;
use crate::error::{Error, Result};
use crate::traits::UpdaterFactory;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};

/// Registry mapping protocol tags to updater factories
///
/// Tags are matched case-insensitively and stored lowercase.
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct UpdaterRegistry {
    updaters: RwLock<HashMap<String, Arc<dyn UpdaterFactory>>>,
}

impl UpdaterRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an updater factory
    ///
    /// # Parameters
    ///
    /// - `protocol`: Protocol tag (e.g., "http", "ssh", "powerdns")
    /// - `factory`: Factory object for creating updater instances
    ///
    /// A second registration under the same tag replaces the first.
    pub fn register_updater(&self, protocol: impl AsRef<str>, factory: Box<dyn UpdaterFactory>) {
        let protocol = protocol.as_ref().to_lowercase();
        tracing::debug!("Registering updater '{}'", protocol);

        let mut updaters = self
            .updaters
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        updaters.insert(protocol, Arc::from(factory));
    }

    /// Look up the factory registered for `protocol`
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn UpdaterFactory>)`: The registered factory
    /// - `Err(Error::UnsupportedProtocol)`: If nothing is registered under the tag
    pub fn get(&self, protocol: &str) -> Result<Arc<dyn UpdaterFactory>> {
        self.read()
            .get(&protocol.to_lowercase())
            .cloned()
            .ok_or_else(|| Error::unsupported(format!("'{}'", protocol)))
    }

    /// Check if an updater is registered under `protocol`
    pub fn has_updater(&self, protocol: &str) -> bool {
        self.read().contains_key(&protocol.to_lowercase())
    }

    /// List all registered protocol tags, sorted
    pub fn list_updaters(&self) -> Vec<String> {
        let mut protocols: Vec<String> = self.read().keys().cloned().collect();
        protocols.sort();
        protocols
    }

    /// Default settings contributed by every registered updater
    ///
    /// Feeds the default layer of [`Config`].
    pub fn default_settings(&self) -> Map<String, Value> {
        let mut settings = Map::new();
        for factory in self.read().values() {
            if let Some((section, values)) = factory.default_settings() {
                settings.insert(section.to_string(), values);
            }
        }
        settings
    }

    /// Host and port the updater registered under `protocol` talks to
    pub fn host_port(&self, protocol: &str, config: &Config) -> Result<(String, u16)> {
        self.get(protocol)?.host_port(config)
    }

    /// Let every registered updater check its section of `config`
    pub fn validate_config(&self, config: &Config) -> Result<()> {
        let factories: Vec<Arc<dyn UpdaterFactory>> = self.read().values().cloned().collect();
        for factory in factories {
            factory.validate(config)?;
        }
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn UpdaterFactory>>> {
        self.updaters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
