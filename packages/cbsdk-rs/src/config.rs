use crate::trial::MAX_CAPACITY;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Engine defaults, loaded from environment variables or a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Instance id used when opening through the registry
    pub instance: u32,
    /// Samples per channel for the continuous cache
    pub continuous_samples: usize,
    /// Events per channel for the event cache
    pub event_samples: usize,
    /// Comments held by the comment cache
    pub comment_samples: usize,
    /// Records per trackable for the tracking cache
    pub tracking_samples: usize,
    /// How long a resetting init waits for the first comment or tracking record
    pub init_wait_ms: u64,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            instance: 0,
            continuous_samples: 102_400,
            event_samples: 16_384,
            comment_samples: 16_384,
            tracking_samples: 16_384,
            init_wait_ms: 250,
        }
    }
}

impl SdkConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            instance: parse_var("CBSDK_INSTANCE", defaults.instance)?,
            continuous_samples: parse_var("CBSDK_CONTINUOUS_SAMPLES", defaults.continuous_samples)?,
            event_samples: parse_var("CBSDK_EVENT_SAMPLES", defaults.event_samples)?,
            comment_samples: parse_var("CBSDK_COMMENT_SAMPLES", defaults.comment_samples)?,
            tracking_samples: parse_var("CBSDK_TRACKING_SAMPLES", defaults.tracking_samples)?,
            init_wait_ms: parse_var("CBSDK_INIT_WAIT_MS", defaults.init_wait_ms)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_json_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn init_wait(&self) -> Duration {
        Duration::from_millis(self.init_wait_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("continuous_samples", self.continuous_samples),
            ("event_samples", self.event_samples),
            ("comment_samples", self.comment_samples),
            ("tracking_samples", self.tracking_samples),
        ] {
            if value > MAX_CAPACITY {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be at most {}",
                    name, MAX_CAPACITY
                )));
            }
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", name, value))),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
