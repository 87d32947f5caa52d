//! Probe timing and retry settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest retry bound accepted for the change-feed consumer.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Timing and retry configuration of the probe pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Seconds between two seeded records.
    pub probe_interval_secs: u64,
    /// Seconds between two expiration sweeps of the in-memory store.
    pub sweep_interval_secs: u64,
    /// How many times a failed detector invocation is retried.
    pub retry_attempts: u32,
}

impl ProbeSettings {
    /// Creates new settings.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared::config::ProbeSettings;
    ///
    /// let settings = ProbeSettings::new(60, 15, 1);
    /// assert_eq!(settings.probe_interval().as_secs(), 60);
    /// assert_eq!(settings.max_invocations(), 2);
    /// ```
    #[must_use]
    pub fn new(probe_interval_secs: u64, sweep_interval_secs: u64, retry_attempts: u32) -> Self {
        Self {
            probe_interval_secs,
            sweep_interval_secs,
            retry_attempts,
        }
    }

    /// Returns the probe interval as a `Duration`.
    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// Returns the sweep interval as a `Duration`.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Total invocations an event may get: the first attempt plus retries.
    #[must_use]
    pub fn max_invocations(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Either interval is zero
    /// - The retry bound exceeds [`MAX_RETRY_ATTEMPTS`]
    pub fn validate(&self) -> Result<(), String> {
        if self.probe_interval_secs == 0 {
            return Err("Probe interval must be greater than zero".to_string());
        }
        if self.sweep_interval_secs == 0 {
            return Err("Sweep interval must be greater than zero".to_string());
        }
        if self.retry_attempts > MAX_RETRY_ATTEMPTS {
            return Err(format!(
                "Retry attempts cannot exceed {MAX_RETRY_ATTEMPTS}"
            ));
        }
        Ok(())
    }
}

impl Default for ProbeSettings {
    /// Returns default settings:
    /// - Probe every 60 seconds
    /// - Sweep every 15 seconds
    /// - Retry a failed invocation once
    fn default() -> Self {
        Self::new(60, 15, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = ProbeSettings::default();
        assert_eq!(settings.probe_interval_secs, 60);
        assert_eq!(settings.sweep_interval_secs, 15);
        assert_eq!(settings.retry_attempts, 1);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_zero_retries_means_single_invocation() {
        let settings = ProbeSettings::new(60, 15, 0);
        assert_eq!(settings.max_invocations(), 1);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_probe_interval() {
        let result = ProbeSettings::new(0, 15, 1).validate();
        assert_eq!(
            result.unwrap_err(),
            "Probe interval must be greater than zero"
        );
    }

    #[test]
    fn test_validate_zero_sweep_interval() {
        assert!(ProbeSettings::new(60, 0, 1).validate().is_err());
    }

    #[test]
    fn test_validate_retry_bound() {
        let result = ProbeSettings::new(60, 15, 11).validate();
        assert_eq!(result.unwrap_err(), "Retry attempts cannot exceed 10");
    }

    #[test]
    fn test_settings_serialization() {
        let settings = ProbeSettings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let deserialized: ProbeSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(settings, deserialized);
    }
}
