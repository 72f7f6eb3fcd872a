//! Driver registry for managing available database drivers

use std::collections::HashMap;
use std::sync::Arc;
use txfixture_core::{ConnectionConfig, DatabaseDriver, DialectInfo, Result, TxFixtureError};

/// Registry of available database drivers, keyed by URL scheme
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DatabaseDriver>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Create a registry with all built-in drivers registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "sqlite")]
        registry.register(Arc::new(crate::sqlite::SqliteDriver::new()));
        registry
    }

    /// Register a new driver
    pub fn register(&mut self, driver: Arc<dyn DatabaseDriver>) {
        let id = driver.id().to_string();
        tracing::info!(driver = %id, "registering database driver");
        self.drivers.insert(id, driver);
    }

    /// Get a driver by id
    pub fn get(&self, id: &str) -> Option<Arc<dyn DatabaseDriver>> {
        let driver = self.drivers.get(id).cloned();
        if driver.is_none() {
            tracing::warn!(driver = %id, "driver not found in registry");
        }
        driver
    }

    /// List all registered driver ids
    pub fn list(&self) -> Vec<&str> {
        self.drivers.keys().map(|s| s.as_str()).collect()
    }

    /// Check if a driver is registered
    pub fn has(&self, id: &str) -> bool {
        self.drivers.contains_key(id)
    }

    /// Get dialect info for a driver by id
    pub fn dialect_info(&self, id: &str) -> Option<DialectInfo> {
        self.drivers.get(id).map(|driver| driver.dialect_info())
    }

    /// Pick the driver for a connection URL and parse the URL with it.
    ///
    /// Unparsable strings and unknown schemes are configuration errors that
    /// quote the offending string.
    pub fn resolve(&self, url: &str) -> Result<(Arc<dyn DatabaseDriver>, ConnectionConfig)> {
        let scheme = ConnectionConfig::from_url(url)?.driver;
        let driver = self.get(&scheme).ok_or_else(|| {
            let mut known = self.list();
            known.sort_unstable();
            TxFixtureError::Configuration(format!(
                "no driver for scheme '{}' in the string '{}' (available: {})",
                scheme,
                url,
                known.join(", ")
            ))
        })?;
        let config = driver.parse_connection_string(url)?;
        Ok((driver, config))
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
