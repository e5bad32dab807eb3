
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;
use crate::llm::LanguageModelConfig;
use crate::retrieval::RetrievalConfig;

const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub language_model: LanguageModelConfig,
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

/// Connection settings for the Ollama server that produces embeddings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "all-minilm:latest".to_string(),
            batch_size: 32,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 8 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid chunk size: {0} (must be between 1 and 10000 words)")]
    InvalidChunkSize(usize),
    #[error("Overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid max tokens: {0} (must be greater than 0)")]
    InvalidMaxTokens(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default configuration directory (`~/.thinkbook`)
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".thinkbook"))
            .or_else(|| dirs::data_dir().map(|data| data.join("thinkbook")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load the configuration from the default directory
    #[inline]
    pub fn load() -> Result<Self> {
        let config_dir = Self::config_dir()?;
        Self::load_from(config_dir)
    }

    /// Load the configuration from `config_dir`, falling back to defaults when
    /// no `config.toml` exists there
    #[inline]
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref();
        let config_path = config_dir.join(CONFIG_FILENAME);

        if !config_path.exists() {
            return Ok(Self {
                base_dir: Some(config_dir.to_path_buf()),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = Some(config_dir.to_path_buf());

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir()?;

        fs::create_dir_all(&config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.base_dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::config_dir(),
        }
    }

    #[inline]
    pub fn config_file_path(&self) -> Result<PathBuf> {
        Ok(self.get_base_dir()?.join(CONFIG_FILENAME))
    }

    /// Root directory under which every notebook's storage lives
    #[inline]
    pub fn data_dir(&self) -> Result<PathBuf> {
        Ok(self.get_base_dir()?.join("data"))
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.validate_chunking_config()?;
        self.validate_retrieval_config()?;
        self.validate_language_model_config()?;
        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(1..=10_000).contains(&config.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size));
        }

        if config.overlap >= config.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                config.overlap,
                config.chunk_size,
            ));
        }

        Ok(())
    }

    fn validate_retrieval_config(&self) -> Result<(), ConfigError> {
        let config = &self.retrieval;

        for top_k in [config.top_k, config.context_top_k] {
            if !(1..=100).contains(&top_k) {
                return Err(ConfigError::InvalidTopK(top_k));
            }
        }

        Ok(())
    }

    fn validate_language_model_config(&self) -> Result<(), ConfigError> {
        let config = &self.language_model;

        if config.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(config.model.clone()));
        }

        if !(0.0..=2.0).contains(&config.temperature) {
            return Err(ConfigError::InvalidTemperature(config.temperature));
        }

        if config.max_tokens == 0 {
            return Err(ConfigError::InvalidMaxTokens(config.max_tokens));
        }

        Ok(())
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidUrl(format!(
                "{}://{}:{}",
                self.protocol, self.host, self.port
            )));
        }

        self.ollama_url()?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(8..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.validate()?;
        self.host = host;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    pub fn set_embedding_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        if !(8..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.embedding_dimension = dimension;
        Ok(())
    }
}
