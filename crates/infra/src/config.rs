//! Configuration loading and representation.

use std::time::Duration;

use crate::jobs::{DuePolicy, ReconcilerConfig};

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is not set")]
    Missing { var: &'static str },

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Tunables of the contact job loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobsConfig {
    /// Minimum time between two publish attempts of one job.
    pub retry_interval: Duration,
    /// Attempts before a job fails permanently.
    pub max_attempts: u32,
    /// Scheduler tick period.
    pub publish_interval: Duration,
    /// Reconciler poll period.
    pub completion_poll_interval: Duration,
    /// Messages pulled per reconciler poll.
    pub completion_batch_size: usize,
    /// Jobs published concurrently within one tick.
    pub publish_concurrency: usize,
    /// Age of a completed job before its artifact and row are purged.
    pub retention: Duration,
    /// Retention sweep period.
    pub retention_sweep_interval: Duration,
    /// Deliveries of one completion message before it is dead-lettered.
    pub max_deliveries: u32,
    /// Idle time before an unacknowledged completion is handed out again.
    pub redelivery_idle: Duration,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(120),
            max_attempts: 20,
            publish_interval: Duration::from_secs(5),
            completion_poll_interval: Duration::from_secs(5),
            completion_batch_size: 10,
            publish_concurrency: 8,
            retention: Duration::from_secs(365 * 24 * 60 * 60),
            retention_sweep_interval: Duration::from_secs(60 * 60),
            max_deliveries: 5,
            redelivery_idle: Duration::from_secs(60),
        }
    }
}

impl JobsConfig {
    /// Load from the process environment; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load through `lookup` (variable name → value).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(Duration::from_secs(positive(&lookup, var, default.as_secs())?))
        };

        Ok(Self {
            retry_interval: secs("CONTACT_JOB_RETRY_INTERVAL_SECS", defaults.retry_interval)?,
            max_attempts: u32::try_from(positive(
                &lookup,
                "CONTACT_JOB_MAX_ATTEMPTS",
                u64::from(defaults.max_attempts),
            )?)
            .map_err(|e| invalid("CONTACT_JOB_MAX_ATTEMPTS", "", e))?,
            publish_interval: secs("CONTACT_JOB_PUBLISH_INTERVAL_SECS", defaults.publish_interval)?,
            completion_poll_interval: secs(
                "CONTACT_JOB_COMPLETION_POLL_INTERVAL_SECS",
                defaults.completion_poll_interval,
            )?,
            completion_batch_size: positive(
                &lookup,
                "CONTACT_JOB_COMPLETION_BATCH_SIZE",
                defaults.completion_batch_size as u64,
            )? as usize,
            publish_concurrency: positive(
                &lookup,
                "CONTACT_JOB_PUBLISH_CONCURRENCY",
                defaults.publish_concurrency as u64,
            )? as usize,
            retention: Duration::from_secs(
                positive(&lookup, "CONTACT_JOB_RETENTION_DAYS", 365)? * 24 * 60 * 60,
            ),
            retention_sweep_interval: secs(
                "CONTACT_JOB_RETENTION_SWEEP_INTERVAL_SECS",
                defaults.retention_sweep_interval,
            )?,
            max_deliveries: u32::try_from(positive(
                &lookup,
                "CONTACT_JOB_MAX_DELIVERIES",
                u64::from(defaults.max_deliveries),
            )?)
            .map_err(|e| invalid("CONTACT_JOB_MAX_DELIVERIES", "", e))?,
            redelivery_idle: secs("CONTACT_JOB_REDELIVERY_IDLE_SECS", defaults.redelivery_idle)?,
        })
    }

    pub fn due_policy(&self) -> DuePolicy {
        DuePolicy {
            retry_interval: self.retry_interval,
            max_attempts: self.max_attempts,
        }
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            max_attempts: self.max_attempts,
            batch_size: self.completion_batch_size,
            max_deliveries: self.max_deliveries,
        }
    }
}

/// Read a required variable.
pub fn required<F>(lookup: F, var: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing { var })
}

fn positive<F>(lookup: &F, var: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(default);
    };
    let value = raw
        .trim()
        .parse::<u64>()
        .map_err(|e| invalid(var, &raw, e))?;
    if value == 0 {
        return Err(invalid(var, &raw, "must be greater than zero"));
    }
    Ok(value)
}

fn invalid(var: &'static str, value: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
