//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.artreport.toml` files.

use anyhow::{Context, Result};
use artreport::analysis::{default_mediums, MediumSpec};
use artreport::llm::{OllamaConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = ".artreport.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Report storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Analysis workflow settings.
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Root folder for projects and their reports.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            verbose: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("artreport-data")
}

/// Ollama model settings. Missing keys fall back to [`OllamaConfig`] defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub ollama_url: String,
    /// Model for text and structured replies.
    pub chat_model: String,
    /// Model that can look at the photograph.
    pub vision_model: String,
    /// Model for medium previews.
    pub image_model: String,
    pub temperature: f32,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let ollama = OllamaConfig::default();
        Self {
            ollama_url: ollama.url,
            chat_model: ollama.chat_model,
            vision_model: ollama.vision_model,
            image_model: ollama.image_model,
            temperature: ollama.temperature,
            timeout_seconds: ollama.timeout_seconds,
        }
    }
}

impl ModelConfig {
    pub fn to_ollama(&self) -> OllamaConfig {
        OllamaConfig {
            url: self.ollama_url.clone(),
            chat_model: self.chat_model.clone(),
            vision_model: self.vision_model.clone(),
            image_model: self.image_model.clone(),
            temperature: self.temperature,
            timeout_seconds: self.timeout_seconds,
        }
    }
}

/// Retry settings for report files that are briefly locked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_retry_attempts() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    250
}

impl StorageConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Duration::from_millis(self.retry_delay_ms))
    }
}

/// Mediums analysed for every photograph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_mediums")]
    pub mediums: Vec<MediumSpec>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            mediums: default_mediums(),
        }
    }
}

impl WorkflowConfig {
    /// The configured mediums, restricted to `names` when given.
    pub fn select(&self, names: Option<&[String]>) -> Result<Vec<MediumSpec>> {
        let Some(names) = names else {
            return Ok(self.mediums.clone());
        };
        names
            .iter()
            .map(|name| {
                self.mediums
                    .iter()
                    .find(|m| m.name.eq_ignore_ascii_case(name.trim()))
                    .cloned()
                    .with_context(|| {
                        let known: Vec<&str> = self.mediums.iter().map(|m| m.name.as_str()).collect();
                        format!("Unknown medium '{}' (configured: {})", name, known.join(", "))
                    })
            })
            .collect()
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values given on the command line override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(ref model) = args.model {
            self.model.chat_model = model.clone();
        }
        if let Some(ref model) = args.vision_model {
            self.model.vision_model = model.clone();
        }
        if let Some(ref model) = args.image_model {
            self.model.image_model = model.clone();
        }
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }
        if let Some(ref dir) = args.data_dir {
            self.general.data_dir = dir.clone();
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
