//! Pools keyed by connection parameters.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tds_client::{Config, ConfigKey};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::TdsSessionManager;
use crate::pool::{Pool, PoolStatus, PooledSession};

/// A pool of TCP sessions.
pub type TdsPool = Pool<TdsSessionManager>;

/// A session checked out of a [`TdsPool`].
pub type PooledTdsSession = PooledSession<TdsSessionManager>;

/// One pool per distinct set of connection parameters.
///
/// Sessions are interchangeable only when their [`Config::key`] matches,
/// so each key gets its own pool, created on first use with the shared
/// [`PoolConfig`].
#[derive(Debug)]
pub struct PoolManager {
    config: PoolConfig,
    pools: Mutex<HashMap<ConfigKey, TdsPool>>,
}

impl PoolManager {
    /// Create a manager whose pools all use `config`.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            config,
            pools: Mutex::new(HashMap::new()),
        })
    }

    /// Get the pool for `config`, creating it if needed.
    pub fn pool(&self, config: &Config) -> Result<TdsPool, PoolError> {
        let config = self.session_config(config)?;
        let key = config.key();
        if let Some(pool) = self.pools.lock().get(&key) {
            return Ok(pool.clone());
        }

        // seeding opens sessions, so build outside the lock
        let pool = Pool::new(TdsSessionManager::new(config), self.config.clone())?;
        let mut pools = self.pools.lock();
        let pool = pools.entry(key).or_insert(pool).clone();
        tracing::debug!(pools = pools.len(), "session pool registered");
        Ok(pool)
    }

    /// Get a session for `config`, waiting up to `timeout`.
    pub fn acquire(
        &self,
        config: &Config,
        timeout: Duration,
    ) -> Result<PooledTdsSession, PoolError> {
        self.pool(config)?.acquire_timeout(timeout)
    }

    /// Return a session to its pool.
    pub fn release(&self, session: PooledTdsSession) {
        drop(session);
    }

    /// Reset the pool for `config`, if one exists.
    pub fn reset_pool(&self, config: &Config) -> Result<(), PoolError> {
        let key = self.session_config(config)?.key();
        let pool = self.pools.lock().get(&key).cloned();
        match pool {
            Some(pool) => pool.reset_pool(),
            None => Ok(()),
        }
    }

    /// Status of the pool for `config`, if one exists.
    pub fn status(&self, config: &Config) -> Result<Option<PoolStatus>, PoolError> {
        let key = self.session_config(config)?.key();
        Ok(self.pools.lock().get(&key).map(Pool::status))
    }

    /// Number of pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }

    /// Whether no pool has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.lock().is_empty()
    }

    /// Close and forget every pool.
    pub fn close_all(&self) {
        let pools: Vec<_> = self.pools.lock().drain().map(|(_, pool)| pool).collect();
        for pool in pools {
            pool.close();
        }
    }

    /// Apply pool-wide overrides to a session configuration.
    fn session_config(&self, config: &Config) -> Result<Config, PoolError> {
        let mut config = config.clone();
        if let Some(size) = self.config.packet_size {
            config.packet_size = size;
        }
        config
            .validate()
            .map_err(|e| PoolError::Configuration(e.to_string()))?;
        Ok(config)
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        for (_, pool) in self.pools.get_mut().drain() {
            pool.close();
        }
    }
}
