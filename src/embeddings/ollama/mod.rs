#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::Embedder;
use crate::ThinkbookError;
use crate::config::OllamaConfig;
use crate::http::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_TIMEOUT_SECONDS, build_agent, request_with_retry};

/// Output dimension of the default `all-minilm` embedding model
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 384;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    #[serde(rename = "input")]
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
            agent: build_agent(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Test connection to Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        self.ping().context("Server ping failed")?;
        self.validate_model().context("Model validation failed")?;

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    /// Ping the Ollama server to check if it's responsive
    #[inline]
    pub fn ping(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build ping URL")?;

        debug!("Pinging Ollama server at {}", url);

        request_with_retry(self.base_url.as_str(), self.retry_attempts, || {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to ping Ollama server")?;

        Ok(())
    }

    /// Validate that the configured model is available.
    ///
    /// A bare model name matches its `:latest` tag.
    #[inline]
    pub fn validate_model(&self) -> Result<()> {
        let models = self.list_models().context("Failed to list models")?;

        let wanted_latest = format!("{}:latest", self.model);
        if models
            .iter()
            .any(|m| m.name == self.model || m.name == wanted_latest)
        {
            debug!("Model {} is available", self.model);
            Ok(())
        } else {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available_models
            );
            Err(anyhow::anyhow!(
                "Model '{}' is not available. Available models: {:?}",
                self.model,
                available_models
            ))
        }
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        let response_text = request_with_retry(self.base_url.as_str(), self.retry_attempts, || {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Embed `texts` in batches of `batch_size`, preserving input order
    #[inline]
    pub fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size as usize) {
            let embeddings = self
                .generate_single_batch(batch)
                .with_context(|| format!("Failed to process batch of {} texts", batch.len()))?;
            results.extend(embeddings);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    fn generate_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            inputs: texts,
        };

        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;

        let response_text = request_with_retry(self.base_url.as_str(), self.retry_attempts, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to generate embeddings")?;

        let response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        if response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            ));
        }

        Ok(response.embeddings)
    }
}

impl Embedder for OllamaClient {
    #[inline]
    fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        self.generate_embeddings(texts)
            .map_err(|e| ThinkbookError::Embedding(format!("{e:#}")))
    }

    #[inline]
    fn model_name(&self) -> &str {
        &self.model
    }
}
