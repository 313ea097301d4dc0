//! Engine configuration.
//!
//! Loading the configuration (files, environment, deployment descriptors) is
//! the host process's job; this module only defines the value, its defaults
//! and its validation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::{ConcurrencyMode, ResilienceMode};
use crate::errors::{PetasosError, PetasosResult};

/// Configuration for the arbitration engine and its sweeper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PetasosConfig {
    /// Interval between sweeps in milliseconds.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Age after which finalised work is garbage-collected, in milliseconds.
    #[serde(default = "default_cleanup_age_ms")]
    pub cleanup_age_ms: u64,
    /// Age after which unfinished work becomes a retry candidate, in milliseconds.
    #[serde(default = "default_timeout_age_ms")]
    pub timeout_age_ms: u64,
    /// Maximum number of retries per attempt.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Deployment strategy.
    #[serde(default)]
    pub resilience_mode: ResilienceMode,
    /// Default concurrency mode stamped onto job cards.
    #[serde(default)]
    pub concurrency_mode: ConcurrencyMode,
    /// Whether registrations are written to the audit trail.
    #[serde(default = "default_audit_enabled")]
    pub audit_enabled: bool,
}

fn default_sweep_interval_ms() -> u64 {
    500
}

fn default_cleanup_age_ms() -> u64 {
    30_000
}

fn default_timeout_age_ms() -> u64 {
    60_000
}

fn default_retry_limit() -> u32 {
    3
}

fn default_audit_enabled() -> bool {
    true
}

impl Default for PetasosConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
            cleanup_age_ms: default_cleanup_age_ms(),
            timeout_age_ms: default_timeout_age_ms(),
            retry_limit: default_retry_limit(),
            resilience_mode: ResilienceMode::default(),
            concurrency_mode: ConcurrencyMode::default(),
            audit_enabled: default_audit_enabled(),
        }
    }
}

impl PetasosConfig {
    /// Creates a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sweep interval.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = duration_to_ms(interval);
        self
    }

    /// Sets the cleanup age.
    #[must_use]
    pub fn with_cleanup_age(mut self, age: Duration) -> Self {
        self.cleanup_age_ms = duration_to_ms(age);
        self
    }

    /// Sets the timeout age.
    #[must_use]
    pub fn with_timeout_age(mut self, age: Duration) -> Self {
        self.timeout_age_ms = duration_to_ms(age);
        self
    }

    /// Sets the retry limit.
    #[must_use]
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    /// Sets the resilience mode.
    #[must_use]
    pub fn with_resilience_mode(mut self, mode: ResilienceMode) -> Self {
        self.resilience_mode = mode;
        self
    }

    /// Sets the default concurrency mode.
    #[must_use]
    pub fn with_concurrency_mode(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency_mode = mode;
        self
    }

    /// Enables or disables audit writes.
    #[must_use]
    pub fn with_audit_enabled(mut self, enabled: bool) -> Self {
        self.audit_enabled = enabled;
        self
    }

    /// Gets the sweep interval as Duration.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Gets the cleanup age as Duration.
    #[must_use]
    pub fn cleanup_age(&self) -> Duration {
        Duration::from_millis(self.cleanup_age_ms)
    }

    /// Gets the timeout age as Duration.
    #[must_use]
    pub fn timeout_age(&self) -> Duration {
        Duration::from_millis(self.timeout_age_ms)
    }

    /// Parses a configuration from JSON, applying defaults and validation.
    pub fn from_json(json: &str) -> PetasosResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration is usable.
    pub fn validate(&self) -> PetasosResult<()> {
        if self.sweep_interval_ms == 0 {
            return Err(PetasosError::Config(
                "sweep_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.timeout_age_ms == 0 {
            return Err(PetasosError::Config(
                "timeout_age_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
