//! Runtime tunables for the lifecycle engine.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Engine configuration.
///
/// Deserializable so a host binary can load it from a config file and
/// hand it to [`LifecycleService`](crate::service::LifecycleService);
/// every field falls back to its default when absent.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GauntletConfig {
    /// How long a single classification attempt may run before the
    /// challenge is rejected as unclassifiable.
    pub classification_timeout_ms: u64,
    /// Capacity of the classification wake-up channel. Overflow is
    /// harmless since every job is also persisted.
    pub job_queue_capacity: usize,
    /// Maximum number of entries in the platform activity feed.
    pub activity_feed_limit: usize,
}

impl Default for GauntletConfig {
    fn default() -> Self {
        Self {
            classification_timeout_ms: 30_000,
            job_queue_capacity: 64,
            activity_feed_limit: 20,
        }
    }
}

impl GauntletConfig {
    pub fn classification_timeout(&self) -> Duration {
        Duration::from_millis(self.classification_timeout_ms)
    }

    /// Checked when a service or query handle takes the config. Zero is
    /// not a usable value for any field.
    pub fn validate(&self) -> Result<()> {
        if self.classification_timeout_ms == 0 {
            return Err(Error::Validation(
                "classification_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.job_queue_capacity == 0 {
            return Err(Error::Validation(
                "job_queue_capacity must be greater than zero".into(),
            ));
        }
        if self.activity_feed_limit == 0 {
            return Err(Error::Validation(
                "activity_feed_limit must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
