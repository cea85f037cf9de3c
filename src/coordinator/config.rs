//! Dispatcher configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use super::aggregator::DEFAULT_RETAIN_RESOLVED;
use crate::config::DispatcherConfig;
use crate::models::DispatchMode;

const DEFAULT_BIND_ADDRESS: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 8080);

/// Configuration for the dispatcher server and its engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Which kind of unit is handed out
    pub mode: DispatchMode,

    /// Capacity of the pending-unit queue
    pub queue_capacity: usize,

    /// Candidates resolved concurrently in split mode
    pub max_in_flight_candidates: usize,

    /// Seconds before an unanswered unit is handed out again (0 disables)
    pub lease_timeout_secs: u64,

    /// Print rejected candidates
    pub show_rejections: bool,

    /// Enable request logging
    pub enable_request_logging: bool,

    /// Resolved candidates remembered for late-verdict detection
    pub retain_resolved: usize,

    /// Stop generating candidates at this value (exclusive)
    pub limit: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS,
            mode: DispatchMode::Split,
            queue_capacity: 100,
            max_in_flight_candidates: 1,
            lease_timeout_secs: 60,
            show_rejections: false,
            enable_request_logging: true,
            retain_resolved: DEFAULT_RETAIN_RESOLVED,
            limit: None,
        }
    }
}

impl CoordinatorConfig {
    /// Create a new config builder
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    /// Builder seeded from the `[dispatcher]` file section
    pub fn from_settings(settings: &DispatcherConfig) -> Result<CoordinatorConfigBuilder, ConfigError> {
        Ok(Self::builder()
            .bind_address_str(&settings.bind_address)?
            .mode(settings.mode)
            .queue_capacity(settings.queue_capacity)
            .max_in_flight_candidates(settings.max_in_flight_candidates)
            .lease_timeout_secs(settings.lease_timeout_secs)
            .show_rejections(settings.show_rejections)
            .enable_request_logging(settings.enable_request_logging))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue_capacity".to_string(),
                reason: "Queue must hold at least 1 unit".to_string(),
            });
        }

        if self.max_in_flight_candidates == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_in_flight_candidates".to_string(),
                reason: "At least 1 candidate must be in flight".to_string(),
            });
        }

        if self.retain_resolved == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retain_resolved".to_string(),
                reason: "Must remember at least 1 resolved candidate".to_string(),
            });
        }

        Ok(())
    }

    /// Lease timeout, `None` when re-dispatch is disabled
    pub fn lease_timeout(&self) -> Option<Duration> {
        (self.lease_timeout_secs > 0).then(|| Duration::from_secs(self.lease_timeout_secs))
    }

    /// Size of the candidate window for the configured mode
    pub fn window_size(&self) -> usize {
        match self.mode {
            DispatchMode::Split => self.max_in_flight_candidates,
            DispatchMode::Whole => self.queue_capacity,
        }
    }
}

/// Builder for CoordinatorConfig
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
    bind_address: Option<SocketAddr>,
    mode: Option<DispatchMode>,
    queue_capacity: Option<usize>,
    max_in_flight_candidates: Option<usize>,
    lease_timeout_secs: Option<u64>,
    show_rejections: Option<bool>,
    enable_request_logging: Option<bool>,
    retain_resolved: Option<usize>,
    limit: Option<u64>,
}

impl CoordinatorConfigBuilder {
    /// Set bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Set bind address from string
    pub fn bind_address_str(mut self, addr: &str) -> Result<Self, ConfigError> {
        self.bind_address = Some(addr.parse().map_err(|_| ConfigError::InvalidValue {
            field: "bind_address".to_string(),
            reason: format!("Invalid address: {}", addr),
        })?);
        Ok(self)
    }

    /// Set dispatch mode
    pub fn mode(mut self, mode: DispatchMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Set split-mode candidate window
    pub fn max_in_flight_candidates(mut self, max: usize) -> Self {
        self.max_in_flight_candidates = Some(max);
        self
    }

    /// Set lease timeout
    pub fn lease_timeout_secs(mut self, secs: u64) -> Self {
        self.lease_timeout_secs = Some(secs);
        self
    }

    /// Show/hide rejected candidates
    pub fn show_rejections(mut self, show: bool) -> Self {
        self.show_rejections = Some(show);
        self
    }

    /// Enable/disable request logging
    pub fn enable_request_logging(mut self, enable: bool) -> Self {
        self.enable_request_logging = Some(enable);
        self
    }

    /// Set resolved-candidate history size
    pub fn retain_resolved(mut self, retain: usize) -> Self {
        self.retain_resolved = Some(retain);
        self
    }

    /// Stop generating candidates at `limit`
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<CoordinatorConfig, ConfigError> {
        let defaults = CoordinatorConfig::default();
        let config = CoordinatorConfig {
            bind_address: self.bind_address.unwrap_or(defaults.bind_address),
            mode: self.mode.unwrap_or(defaults.mode),
            queue_capacity: self.queue_capacity.unwrap_or(defaults.queue_capacity),
            max_in_flight_candidates: self
                .max_in_flight_candidates
                .unwrap_or(defaults.max_in_flight_candidates),
            lease_timeout_secs: self.lease_timeout_secs.unwrap_or(defaults.lease_timeout_secs),
            show_rejections: self.show_rejections.unwrap_or(defaults.show_rejections),
            enable_request_logging: self
                .enable_request_logging
                .unwrap_or(defaults.enable_request_logging),
            retain_resolved: self.retain_resolved.unwrap_or(defaults.retain_resolved),
            limit: self.limit,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address.port(), 8080);
        assert_eq!(config.window_size(), 1);
        assert_eq!(config.lease_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_config_builder() {
        let config = CoordinatorConfig::builder()
            .mode(DispatchMode::Whole)
            .queue_capacity(16)
            .lease_timeout_secs(0)
            .limit(1000)
            .build()
            .unwrap();

        assert_eq!(config.mode, DispatchMode::Whole);
        assert_eq!(config.window_size(), 16);
        assert_eq!(config.lease_timeout(), None);
        assert_eq!(config.limit, Some(1000));
    }

    #[test]
    fn test_config_validation_fails() {
        let result = CoordinatorConfig::builder().max_in_flight_candidates(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_builder_with_address() {
        let config = CoordinatorConfig::builder()
            .bind_address_str("127.0.0.1:9000")
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(config.bind_address.port(), 9000);
        assert!(CoordinatorConfig::builder().bind_address_str("nope").is_err());
    }

    #[test]
    fn test_from_settings() {
        let settings = DispatcherConfig {
            show_rejections: true,
            ..DispatcherConfig::default()
        };
        let config = CoordinatorConfig::from_settings(&settings)
            .unwrap()
            .build()
            .unwrap();
        assert!(config.show_rejections);
        assert_eq!(config.queue_capacity, 100);
    }
}
