//! Recovery configuration
//!
//! Timing constants for the controller, with environment overrides.

use crate::Result;
use anyhow::bail;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Grace window before a "likely" classification escalates to a decision surface
pub const ENV_GRACE_MS: &str = "TT_RECOVERY_GRACE_MS";
/// Minimum interval between automatic modal retries
pub const ENV_RETRY_COOLDOWN_MS: &str = "TT_RECOVERY_RETRY_COOLDOWN_MS";
/// Interval between background re-probes
pub const ENV_BACKGROUND_COOLDOWN_MS: &str = "TT_RECOVERY_BACKGROUND_COOLDOWN_MS";
/// Capacity of the event broadcast channel
pub const ENV_EVENT_CAPACITY: &str = "TT_RECOVERY_EVENT_CAPACITY";

/// Recovery configuration for fine-tuning controller behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryConfig {
    /// Wait before surfacing a decision for a "likely" classification
    pub escalation_grace: Duration,
    /// Minimum spacing of automatic retries for the active session
    pub retry_cooldown: Duration,
    /// Spacing of background re-probes for torrents not bound to a modal
    pub background_cooldown: Duration,
    /// Buffered events per subscriber
    pub event_capacity: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            escalation_grace: Duration::from_millis(1500),
            retry_cooldown: Duration::from_secs(5),
            background_cooldown: Duration::from_secs(10),
            event_capacity: 64,
        }
    }
}

impl RecoveryConfig {
    /// Defaults overlaid with any `TT_RECOVERY_*` environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            escalation_grace: duration_from_env(ENV_GRACE_MS, defaults.escalation_grace),
            retry_cooldown: duration_from_env(ENV_RETRY_COOLDOWN_MS, defaults.retry_cooldown),
            background_cooldown: duration_from_env(
                ENV_BACKGROUND_COOLDOWN_MS,
                defaults.background_cooldown,
            ),
            event_capacity: parse_from_env(ENV_EVENT_CAPACITY).unwrap_or(defaults.event_capacity),
        };
        config.validate()?;
        Ok(config)
    }

    /// Set grace window and return self for chaining
    pub fn with_escalation_grace(mut self, grace: Duration) -> Self {
        self.escalation_grace = grace;
        self
    }

    /// Set retry cooldown and return self for chaining
    pub fn with_retry_cooldown(mut self, cooldown: Duration) -> Self {
        self.retry_cooldown = cooldown;
        self
    }

    /// Set background cooldown and return self for chaining
    pub fn with_background_cooldown(mut self, cooldown: Duration) -> Self {
        self.background_cooldown = cooldown;
        self
    }

    /// Reject values that would turn timer-gated loops into tight loops
    pub fn validate(&self) -> Result<()> {
        if self.retry_cooldown.is_zero() {
            bail!("retry cooldown must be greater than zero");
        }
        if self.background_cooldown.is_zero() {
            bail!("background cooldown must be greater than zero");
        }
        if self.event_capacity == 0 {
            bail!("event capacity must be greater than zero");
        }
        Ok(())
    }
}

fn parse_from_env<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match T::from_str(raw.trim()) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable recovery setting");
            None
        }
    }
}

fn duration_from_env(key: &str, default: Duration) -> Duration {
    parse_from_env::<u64>(key)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            ENV_GRACE_MS,
            ENV_RETRY_COOLDOWN_MS,
            ENV_BACKGROUND_COOLDOWN_MS,
            ENV_EVENT_CAPACITY,
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = RecoveryConfig::from_env().unwrap();
        assert_eq!(config, RecoveryConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var(ENV_GRACE_MS, "250");
        env::set_var(ENV_BACKGROUND_COOLDOWN_MS, "not-a-number");
        let config = RecoveryConfig::from_env().unwrap();
        assert_eq!(config.escalation_grace, Duration::from_millis(250));
        assert_eq!(
            config.background_cooldown,
            RecoveryConfig::default().background_cooldown
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_zero_cooldown_rejected() {
        clear_env();
        env::set_var(ENV_RETRY_COOLDOWN_MS, "0");
        assert!(RecoveryConfig::from_env().is_err());
        clear_env();
    }
}
