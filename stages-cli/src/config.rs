use std::path::Path;

use serde::{Deserialize, Serialize};
use stages_api::{DEFAULT_BATCH_SIZE, PipelineConfig};
use tracing::debug;

use crate::cli::Args;
use crate::error::{AppError, Result};

/// Settings of the demonstration stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub count: u64,
    pub batch_size: usize,
    /// Every k-th item is non-batchable; 0 disables.
    pub urgent_every: u64,
    pub fail_at: Option<u64>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            count: 10_000,
            batch_size: DEFAULT_BATCH_SIZE,
            urgent_every: 0,
            fail_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub demo: DemoConfig,
}

impl AppConfig {
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading config");
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Resolve the config file (if any) and apply command-line overrides.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(args);
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, args: &Args) {
        if let Some(capacity) = args.capacity {
            self.pipeline.channel_capacity = capacity;
        }
        if args.profile {
            self.pipeline.profiling = true;
        }
        if let Some(count) = args.count {
            self.demo.count = count;
        }
        if let Some(batch_size) = args.batch_size {
            self.demo.batch_size = batch_size;
        }
        if let Some(urgent_every) = args.urgent_every {
            self.demo.urgent_every = urgent_every;
        }
        if args.fail_at.is_some() {
            self.demo.fail_at = args.fail_at;
        }
    }

    fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        if self.demo.batch_size == 0 {
            return Err(AppError::InvalidInput(
                "batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.pipeline.channel_capacity, 100);
        assert_eq!(config.demo.batch_size, 50);
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            [pipeline]
            channel_capacity = 8
            grace_period_ms = 500

            [demo]
            urgent_every = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.channel_capacity, 8);
        assert_eq!(config.pipeline.grace_period_ms, 500);
        assert!(!config.pipeline.profiling);
        assert_eq!(config.demo.urgent_every, 7);
        assert_eq!(config.demo.count, 10_000);
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let result = AppConfig::from_toml("[pipeline]\nchannel_capacity = \"many\"");
        assert!(matches!(result, Err(AppError::ConfigParse(_))));
    }

    #[test]
    fn test_args_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pipeline]\nchannel_capacity = 8\n[demo]\ncount = 5").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = Args::parse_from(["stages", "--config", &path, "--capacity", "2", "--profile"]);
        let config = AppConfig::from_args(&args).unwrap();
        assert_eq!(config.pipeline.channel_capacity, 2);
        assert!(config.pipeline.profiling);
        assert_eq!(config.demo.count, 5);
    }

    #[test]
    fn test_zero_capacity_from_args_is_rejected() {
        let args = Args::parse_from(["stages", "--capacity", "0"]);
        assert!(matches!(
            AppConfig::from_args(&args),
            Err(AppError::Pipeline(_))
        ));
    }
}
