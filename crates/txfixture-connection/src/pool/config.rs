//! Pool configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use txfixture_core::{Result, TxFixtureError};

/// Configuration for a connection pool.
///
/// Deserializes from the `[pool]` table of the settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Connections opened eagerly by `ConnectionPool::warm_up`
    min_size: usize,
    /// Upper bound on connections checked out at once
    max_size: usize,
    acquire_timeout_ms: u64,
    /// Idle connections older than this are closed instead of reused
    idle_timeout_ms: u64,
    max_lifetime_ms: Option<u64>,
}

impl PoolConfig {
    /// # Panics
    ///
    /// Panics if `min_size > max_size` or if `max_size` is 0.
    pub fn new(min_size: usize, max_size: usize) -> Self {
        let config = Self {
            min_size,
            max_size,
            ..Self::default()
        };
        if let Err(e) = config.validate() {
            panic!("{}", e);
        }
        config
    }

    /// Check the sizes, for configurations that came from a file
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(TxFixtureError::Configuration(format!(
                "max_size must be greater than 0, got {}",
                self.max_size
            )));
        }
        if self.min_size > self.max_size {
            return Err(TxFixtureError::Configuration(format!(
                "min_size ({}) cannot exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }

    pub fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_lifetime_ms(mut self, lifetime_ms: u64) -> Self {
        self.max_lifetime_ms = Some(lifetime_ms);
        self
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime_ms.map(Duration::from_millis)
    }
}

impl Default for PoolConfig {
    /// Zero to five connections, 10s acquire timeout, 5min idle timeout
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 5,
            acquire_timeout_ms: 10_000,
            idle_timeout_ms: 300_000,
            max_lifetime_ms: None,
        }
    }
}
