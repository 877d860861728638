//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// Options recognized by the scheduler.
///
/// Durations are (de)serialized as milliseconds:
///
/// ```json
/// { "idleDelayMs": 500, "nextDelayMs": 0, "errorBackoff": { "initialMs": 100, "maxMs": 30000 } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    /// Wait after a tick that found nothing to claim.
    #[serde(rename = "idleDelayMs", with = "millis")]
    pub idle_delay: Duration,
    /// Minimum gap before the same job may run again.
    #[serde(rename = "nextDelayMs", with = "millis")]
    pub next_delay: Duration,
    /// Back off after consecutive failures. Disabled when absent.
    pub error_backoff: Option<BackoffConfig>,
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = delay;
        self
    }

    pub fn with_next_delay(mut self, delay: Duration) -> Self {
        self.next_delay = delay;
        self
    }

    pub fn with_error_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.error_backoff = Some(backoff);
        self
    }

    /// Reject configurations the engine cannot honor.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if let Some(backoff) = &self.error_backoff {
            backoff.validate()?;
        }
        Ok(())
    }
}

/// Exponential backoff applied to consecutive failed ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    #[serde(rename = "initialMs", with = "millis")]
    pub initial: Duration,
    /// Upper bound for any single delay.
    #[serde(rename = "maxMs", with = "millis")]
    pub max: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    fn validate(&self) -> Result<(), SchedulerError> {
        if self.initial.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "errorBackoff.initialMs must be greater than zero".to_string(),
            ));
        }
        if self.max < self.initial {
            return Err(SchedulerError::InvalidConfig(
                "errorBackoff.maxMs must not be smaller than initialMs".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(SchedulerError::InvalidConfig(format!(
                "errorBackoff.multiplier must be at least 1.0, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
