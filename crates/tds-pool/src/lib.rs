//! # tds-pool
//!
//! Bounded session pool for TDS clients.
//!
//! Sessions are blocking and single-owner, so the pool hands each one to
//! exactly one caller at a time and takes it back when the guard drops.
//!
//! ## Features
//!
//! - Configurable minimum and maximum pool sizes
//! - Acquisition timeout with fair wake-up of waiting callers
//! - Probe and reset before a session is reused
//! - Broken sessions closed on a background reaper thread
//! - Pool reset that retires every session opened before it
//! - Non-pooled mode for debugging
//! - [`PoolManager`] keeping one pool per set of connection parameters
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use tds_client::Config;
//! use tds_pool::{PoolConfig, PoolManager};
//!
//! # fn main() -> Result<(), tds_pool::PoolError> {
//! let manager = PoolManager::new(PoolConfig::new().min_size(1).max_size(8))?;
//! let config = Config::new().host("localhost").sql_login("sa", "");
//!
//! let mut session = manager.acquire(&config, Duration::from_secs(5))?;
//! session.run("update counters set n = n + 1")?;
//! // Session returned to the pool on drop
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod pool;

pub use config::PoolConfig;
pub use error::PoolError;
pub use lifecycle::{SessionManager, SessionMetadata, TdsSessionManager};
pub use manager::{PoolManager, PooledTdsSession, TdsPool};
pub use pool::{Pool, PoolStatus, PooledSession};
