// Configuration management for the definition graph builder

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::analyzer::document::MAX_NESTING;
use crate::analyzer::policy::PolicyConfig;

/// File looked up in the working directory when no `--config` is given
pub const CONFIG_FILE: &str = ".defgraph.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Required root element of a definition document
    pub root_element: String,
    /// Directory inside a module holding its definition documents
    pub definitions_directory: String,
    /// Module metadata document, relative to the module directory
    pub metadata_file: String,
    pub max_depth: usize,
    pub report_dangling_parents: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Documents read and parsed concurrently
    pub threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub archive: PathBuf,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            root_element: "Defs".to_string(),
            definitions_directory: "Defs".to_string(),
            metadata_file: "About/About.xml".to_string(),
            max_depth: 64,
            report_dangling_parents: true,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { threads: 4 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            archive: PathBuf::from("analysis.db"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a directory
    /// Looks for .defgraph.toml in that directory and falls back to the
    /// defaults when it is missing or invalid
    pub fn from_project_dir<P: AsRef<Path>>(project_dir: P) -> (Self, ConfigSource) {
        let config_path = project_dir.as_ref().join(CONFIG_FILE);
        if !config_path.is_file() {
            return (Self::default(), ConfigSource::Default(None));
        }

        match Self::from_file(&config_path) {
            Ok(config) => (config, ConfigSource::File(config_path)),
            Err(e) => {
                let reason = format!("{}: {}", config_path.display(), e);
                (Self::default(), ConfigSource::Default(Some(reason)))
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.analysis.root_element.trim().is_empty() {
            return Err(anyhow::anyhow!("Root element cannot be empty"));
        }
        if self.analysis.definitions_directory.trim().is_empty() {
            return Err(anyhow::anyhow!("Definitions directory cannot be empty"));
        }
        if self.analysis.max_depth == 0 {
            return Err(anyhow::anyhow!("Max depth must be greater than 0"));
        }
        if self.analysis.max_depth >= MAX_NESTING {
            return Err(anyhow::anyhow!("Max depth must be less than {}", MAX_NESTING));
        }

        if self.performance.threads == 0 {
            return Err(anyhow::anyhow!("Thread count must be greater than 0"));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level));
        }
        let valid_formats = ["compact", "pretty", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!("Invalid log format: {}", self.logging.format));
        }

        Ok(())
    }
}

/// Where the active configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    /// Built-in defaults, with the reason a discovered file was rejected
    Default(Option<String>),
}

impl ConfigSource {
    /// Report the source once logging is initialized
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => tracing::info!("Loaded configuration from {}", path.display()),
            ConfigSource::Default(None) => tracing::info!("Using default configuration"),
            ConfigSource::Default(Some(reason)) => {
                tracing::warn!("Ignoring invalid configuration {}", reason);
                tracing::info!("Using default configuration");
            }
        }
    }
}

/// Load configuration from an explicit file, or the working directory
pub fn load_config(path: Option<&Path>) -> anyhow::Result<(Config, ConfigSource)> {
    match path {
        Some(path) => Ok((Config::from_file(path)?, ConfigSource::File(path.to_path_buf()))),
        None => Ok(Config::from_project_dir(".")),
    }
}
