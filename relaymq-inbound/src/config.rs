//! Delivery engine configuration types and builder.

use std::time::Duration;

/// Default steady pool size.
const DEFAULT_POOL_STEADY_SIZE: usize = 10;
/// Default maximum pool size.
const DEFAULT_POOL_MAX_SIZE: usize = 15;
/// Default number of delivery attempts before a message is undeliverable.
const DEFAULT_REDELIVERY_ATTEMPTS: u32 = 6;
/// Default pause between delivery attempts.
const DEFAULT_REDELIVERY_INTERVAL: Duration = Duration::from_millis(500);
/// Default number of endpoint lease attempts at worker construction.
const DEFAULT_ENDPOINT_LEASE_ATTEMPTS: u32 = 5;
/// Default base backoff between endpoint lease attempts.
const DEFAULT_ENDPOINT_LEASE_BACKOFF: Duration = Duration::from_millis(200);

/// Configuration error returned when validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for the inbound delivery engine.
///
/// Built with [`InboundConfig::builder`]; every option has a production
/// default matching the recognized activation options.
#[derive(Debug, Clone)]
pub struct InboundConfig {
    pool_steady_size: usize,
    pool_max_size: usize,
    redelivery_attempts: u32,
    redelivery_interval: Duration,
    dead_letter_on_exhaustion: bool,
    same_rm_allowed: bool,
    notify_end_always: bool,
    serialized_delivery: bool,
    endpoint_lease_attempts: u32,
    endpoint_lease_backoff: Duration,
}

impl InboundConfig {
    /// Returns a builder with default values.
    pub fn builder() -> InboundConfigBuilder {
        InboundConfigBuilder::new()
    }

    /// Returns the steady (pre-created) worker pool size.
    pub fn pool_steady_size(&self) -> usize {
        self.pool_steady_size
    }

    /// Returns the maximum worker pool size.
    pub fn pool_max_size(&self) -> usize {
        self.pool_max_size
    }

    /// Returns the total number of delivery attempts made for a message
    /// before it is acknowledged undeliverable.
    pub fn redelivery_attempts(&self) -> u32 {
        self.redelivery_attempts
    }

    /// Returns the pause between delivery attempts.
    pub fn redelivery_interval(&self) -> Duration {
        self.redelivery_interval
    }

    /// Returns true if exhausted messages are routed to the dead-letter
    /// destination instead of being left to broker redelivery.
    pub fn dead_letter_on_exhaustion(&self) -> bool {
        self.dead_letter_on_exhaustion
    }

    /// Returns true if branches on the same broker session may report
    /// themselves as the same resource manager.
    pub fn same_rm_allowed(&self) -> bool {
        self.same_rm_allowed
    }

    /// Returns true if every `end` is forwarded to the broker regardless of
    /// sibling branch state (legacy compatibility behavior).
    pub fn notify_end_always(&self) -> bool {
        self.notify_end_always
    }

    /// Returns true if messages are delivered inline on the dispatching task
    /// instead of through the worker pool.
    pub fn serialized_delivery(&self) -> bool {
        self.serialized_delivery
    }

    /// Returns the number of endpoint lease attempts at worker construction.
    pub fn endpoint_lease_attempts(&self) -> u32 {
        self.endpoint_lease_attempts
    }

    /// Returns the base backoff between endpoint lease attempts.
    pub fn endpoint_lease_backoff(&self) -> Duration {
        self.endpoint_lease_backoff
    }
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            pool_steady_size: DEFAULT_POOL_STEADY_SIZE,
            pool_max_size: DEFAULT_POOL_MAX_SIZE,
            redelivery_attempts: DEFAULT_REDELIVERY_ATTEMPTS,
            redelivery_interval: DEFAULT_REDELIVERY_INTERVAL,
            dead_letter_on_exhaustion: true,
            same_rm_allowed: false,
            notify_end_always: false,
            serialized_delivery: false,
            endpoint_lease_attempts: DEFAULT_ENDPOINT_LEASE_ATTEMPTS,
            endpoint_lease_backoff: DEFAULT_ENDPOINT_LEASE_BACKOFF,
        }
    }
}

/// Builder for [`InboundConfig`].
#[derive(Debug, Clone)]
pub struct InboundConfigBuilder {
    config: InboundConfig,
}

impl InboundConfigBuilder {
    /// Creates a builder with default values.
    pub fn new() -> Self {
        Self {
            config: InboundConfig::default(),
        }
    }

    /// Sets the steady (pre-created) worker pool size.
    pub fn pool_steady_size(mut self, size: usize) -> Self {
        self.config.pool_steady_size = size;
        self
    }

    /// Sets the maximum worker pool size.
    pub fn pool_max_size(mut self, size: usize) -> Self {
        self.config.pool_max_size = size;
        self
    }

    /// Sets the total number of delivery attempts per message.
    pub fn redelivery_attempts(mut self, attempts: u32) -> Self {
        self.config.redelivery_attempts = attempts;
        self
    }

    /// Sets the pause between delivery attempts.
    pub fn redelivery_interval(mut self, interval: Duration) -> Self {
        self.config.redelivery_interval = interval;
        self
    }

    /// Routes exhausted messages to the dead-letter destination.
    pub fn dead_letter_on_exhaustion(mut self, enabled: bool) -> Self {
        self.config.dead_letter_on_exhaustion = enabled;
        self
    }

    /// Allows same-resource-manager comparison by broker session id.
    pub fn same_rm_allowed(mut self, allowed: bool) -> Self {
        self.config.same_rm_allowed = allowed;
        self
    }

    /// Forwards every `end` to the broker regardless of sibling state.
    pub fn notify_end_always(mut self, always: bool) -> Self {
        self.config.notify_end_always = always;
        self
    }

    /// Delivers messages inline on the dispatching task, preserving strict
    /// per-consumer ordering.
    pub fn serialized_delivery(mut self, serialized: bool) -> Self {
        self.config.serialized_delivery = serialized;
        self
    }

    /// Sets the number of endpoint lease attempts at worker construction.
    pub fn endpoint_lease_attempts(mut self, attempts: u32) -> Self {
        self.config.endpoint_lease_attempts = attempts;
        self
    }

    /// Sets the base backoff between endpoint lease attempts.
    pub fn endpoint_lease_backoff(mut self, backoff: Duration) -> Self {
        self.config.endpoint_lease_backoff = backoff;
        self
    }

    /// Validates the options and builds the configuration.
    pub fn build(self) -> Result<InboundConfig, ConfigError> {
        let config = self.config;
        if config.pool_max_size < 1 {
            return Err(ConfigError::new("pool_max_size must be greater than 0"));
        }
        if config.pool_steady_size > config.pool_max_size {
            return Err(ConfigError::new(format!(
                "pool_steady_size ({}) must be less than or equal to pool_max_size ({})",
                config.pool_steady_size, config.pool_max_size
            )));
        }
        if config.redelivery_attempts < 1 {
            return Err(ConfigError::new(
                "redelivery_attempts must be greater than 0",
            ));
        }
        if config.redelivery_interval.is_zero() {
            return Err(ConfigError::new(
                "redelivery_interval must be greater than 0",
            ));
        }
        if config.endpoint_lease_attempts < 1 {
            return Err(ConfigError::new(
                "endpoint_lease_attempts must be greater than 0",
            ));
        }
        Ok(config)
    }
}

impl Default for InboundConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
