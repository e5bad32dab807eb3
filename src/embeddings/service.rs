// Process-wide embedding handle
// The capability is loaded once on first use and shared by every notebook

use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{Embedder, OllamaClient};
use crate::config::OllamaConfig;
use crate::{Result, ThinkbookError};

type Loader = Arc<dyn Fn() -> Result<Arc<dyn Embedder>> + Send + Sync>;

/// Once-initialized, thread-safe owner of the embedding capability.
///
/// Concurrent first callers observe a single initialization. A failed load is
/// not cached, so a later call retries it.
pub struct EmbeddingService {
    embedder: OnceCell<Arc<dyn Embedder>>,
    loader: Loader,
}

impl fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("loaded", &self.embedder.initialized())
            .finish()
    }
}

impl EmbeddingService {
    /// Lazily load the embedder with `loader` on first use
    #[inline]
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Embedder>> + Send + Sync + 'static,
    {
        Self {
            embedder: OnceCell::new(),
            loader: Arc::new(loader),
        }
    }

    /// Wrap an already-constructed embedder
    #[inline]
    pub fn with_embedder(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder: OnceCell::new_with(Some(embedder)),
            loader: Arc::new(|| {
                Err(ThinkbookError::Config(
                    "embedding capability already provided".to_string(),
                ))
            }),
        }
    }

    /// Ollama-backed service; the client is built and health-checked on first use
    #[inline]
    pub fn ollama(config: OllamaConfig) -> Self {
        Self::new(move || {
            let client = OllamaClient::new(&config)?;
            client.health_check()?;
            Ok(Arc::new(client) as Arc<dyn Embedder>)
        })
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.embedder.initialized()
    }

    /// The shared embedder, loading it on the blocking pool if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ThinkbookError::Config`] when the capability cannot be loaded.
    #[inline]
    pub async fn get(&self) -> Result<Arc<dyn Embedder>> {
        let embedder = self
            .embedder
            .get_or_try_init(|| async {
                debug!("Loading embedding capability");
                let loader = Arc::clone(&self.loader);
                tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| ThinkbookError::Config(format!("embedding loader failed: {e}")))?
                    .map_err(|e| {
                        ThinkbookError::Config(format!("embedding capability unavailable: {e}"))
                    })
            })
            .await?;

        Ok(Arc::clone(embedder))
    }

    /// Embed `texts` on the blocking pool
    #[inline]
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let embedder = self.get().await?;
        let count = texts.len();
        let vectors = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
            .await
            .map_err(|e| ThinkbookError::Embedding(format!("embedding task failed: {e}")))??;

        if vectors.len() != count {
            return Err(ThinkbookError::Embedding(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                count
            )));
        }

        Ok(vectors)
    }

    /// Embed a single text on the blocking pool
    #[inline]
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let embedder = self.get().await?;
        let text = text.to_string();
        tokio::task::spawn_blocking(move || embedder.embed_one(&text))
            .await
            .map_err(|e| ThinkbookError::Embedding(format!("embedding task failed: {e}")))?
    }

    /// Model name of the loaded embedder
    #[inline]
    pub async fn model_name(&self) -> Result<String> {
        let embedder = self.get().await?;
        Ok(embedder.model_name().to_string())
    }
}
