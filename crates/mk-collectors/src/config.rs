//! Shared collector configuration with validated ranges.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::CollectorError;

/// Settings every collector shares. Ranges are enforced by
/// [`CollectorConfig::validate`] before a collector starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Wall-clock poll interval (1 s to 1 h).
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    /// Per-operation timeout (1 s to 60 s).
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Transient-failure retry budget (0 to 10).
    pub retries: u32,
    /// Records buffered before a flush (1 to 1000).
    pub batch_size: usize,
    /// Concurrent targets per poll (1 to 100).
    pub max_concurrent: usize,
    /// Buffered records are flushed at least this often.
    #[serde(with = "duration_secs")]
    pub flush_interval: Duration,
    pub enabled: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            poll_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(10),
            retries: 3,
            batch_size: 100,
            max_concurrent: 10,
            flush_interval: Duration::from_secs(5),
            enabled: true,
        }
    }
}

impl CollectorConfig {
    pub fn validate(&self) -> Result<(), CollectorError> {
        if self.poll_interval < Duration::from_secs(1) || self.poll_interval > Duration::from_secs(3600)
        {
            return Err(CollectorError::Config(format!(
                "poll interval {:?} outside 1s..1h",
                self.poll_interval
            )));
        }
        if self.timeout < Duration::from_secs(1) || self.timeout > Duration::from_secs(60) {
            return Err(CollectorError::Config(format!(
                "timeout {:?} outside 1s..60s",
                self.timeout
            )));
        }
        if self.retries > 10 {
            return Err(CollectorError::Config(format!(
                "retries {} above 10",
                self.retries
            )));
        }
        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(CollectorError::Config(format!(
                "batch size {} outside 1..1000",
                self.batch_size
            )));
        }
        if self.max_concurrent == 0 || self.max_concurrent > 100 {
            return Err(CollectorError::Config(format!(
                "max concurrent {} outside 1..100",
                self.max_concurrent
            )));
        }
        Ok(())
    }
}

mod duration_secs {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
