//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Smallest packet size a session may negotiate.
const MIN_PACKET_SIZE: u16 = 512;

/// Configuration for a session pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Number of sessions opened when the pool starts or is reset.
    pub min_size: u32,

    /// Maximum number of live sessions.
    pub max_size: u32,

    /// Packet size requested by pooled sessions; `None` keeps the
    /// session configuration's value.
    pub packet_size: Option<u16>,

    /// Seconds [`Pool::acquire`](crate::Pool::acquire) waits for a session.
    pub timeout_seconds: u64,

    /// Whether released sessions are kept for reuse.
    ///
    /// When disabled every acquisition opens a new session and every
    /// release closes it.
    pub pooling_enabled: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 10,
            packet_size: None,
            timeout_seconds: 30,
            pooling_enabled: true,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of sessions kept open from the start.
    #[must_use]
    pub fn min_size(mut self, count: u32) -> Self {
        self.min_size = count;
        self
    }

    /// Set the maximum number of live sessions.
    #[must_use]
    pub fn max_size(mut self, count: u32) -> Self {
        self.max_size = count;
        self
    }

    /// Override the packet size of pooled sessions.
    #[must_use]
    pub fn packet_size(mut self, size: u16) -> Self {
        self.packet_size = Some(size);
        self
    }

    /// Set the acquisition timeout in seconds.
    #[must_use]
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Enable or disable session reuse.
    #[must_use]
    pub fn pooling_enabled(mut self, enabled: bool) -> Self {
        self.pooling_enabled = enabled;
        self
    }

    /// The acquisition timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::Configuration(
                "max_size must be greater than 0".into(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(PoolError::Configuration(
                "min_size cannot be greater than max_size".into(),
            ));
        }
        if self.timeout_seconds == 0 {
            return Err(PoolError::Configuration(
                "timeout_seconds must be greater than 0".into(),
            ));
        }
        if let Some(size) = self.packet_size {
            if size < MIN_PACKET_SIZE {
                return Err(PoolError::Configuration(format!(
                    "packet_size must be at least {MIN_PACKET_SIZE}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_size, 0);
        assert_eq!(config.max_size, 10);
        assert!(config.packet_size.is_none());
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.pooling_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder_methods() {
        let config = PoolConfig::new()
            .min_size(2)
            .max_size(8)
            .packet_size(8192)
            .timeout_seconds(5)
            .pooling_enabled(false);

        assert_eq!(config.min_size, 2);
        assert_eq!(config.max_size, 8);
        assert_eq!(config.packet_size, Some(8192));
        assert_eq!(config.timeout_seconds, 5);
        assert!(!config.pooling_enabled);
    }

    #[test]
    fn test_config_validation_min_greater_than_max() {
        let result = PoolConfig::new().min_size(20).max_size(10).validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("min_size cannot be greater than max_size")
        );
    }

    #[test]
    fn test_config_validation_zero_max() {
        let mut config = PoolConfig::new();
        config.max_size = 0;
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("max_size must be greater than 0")
        );
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        assert!(PoolConfig::new().timeout_seconds(0).validate().is_err());
    }

    #[test]
    fn test_config_validation_small_packet() {
        assert!(PoolConfig::new().packet_size(256).validate().is_err());
        assert!(PoolConfig::new().packet_size(512).validate().is_ok());
    }

    #[test]
    fn test_config_equal_min_max() {
        assert!(PoolConfig::new().min_size(5).max_size(5).validate().is_ok());
    }
}
