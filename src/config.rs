use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::audio::{InputConfig, MeterConfig};

const DEFAULT_CONFIG_FILE: &str = "speech-capture";
const ENV_PREFIX: &str = "SPEECH_CAPTURE";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub capture: InputConfig,
    pub meter: MeterConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for recordings written without an explicit path
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("recordings"),
        }
    }
}

impl Config {
    /// Load configuration from `path` (or `speech-capture.{toml,json,yaml}` in
    /// the working directory when `None`), then apply `SPEECH_CAPTURE__*`
    /// environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::with_name(path),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }
}
