//! Pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::PipelineError;
use crate::channel::DEFAULT_CHANNEL_CAPACITY;

/// Configuration shared by every run of a [`Pipeline`](crate::Pipeline).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of items buffered between two consecutive stages.
    pub channel_capacity: usize,
    /// Use instrumented channels that report queue depth and wait latency.
    pub profiling: bool,
    /// How long to wait for cancelled stages after a failure, in milliseconds.
    pub grace_period_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            profiling: false,
            grace_period_ms: 60_000,
        }
    }
}

impl PipelineConfig {
    pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity;
        self
    }

    pub fn with_profiling(mut self, profiling: bool) -> Self {
        self.profiling = profiling;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period_ms = grace_period.as_millis() as u64;
        self
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Reject settings no pipeline can run with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.channel_capacity == 0 {
            return Err(PipelineError::Config(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.channel_capacity, 100);
        assert!(!config.profiling);
        assert_eq!(config.grace_period(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let config = PipelineConfig::default().with_channel_capacity(0);
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{"profiling": true}"#).unwrap();
        assert!(config.profiling);
        assert_eq!(config.channel_capacity, 100);
        assert_eq!(config.grace_period_ms, 60_000);
    }
}
