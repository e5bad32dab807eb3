// Embeddings module
// Word-window chunking, the embedding capability and its process-wide handle

pub mod chunking;
pub mod ollama;
pub mod service;

pub use chunking::{Chunk, ChunkingConfig, chunk_document, chunk_text};
pub use ollama::{DEFAULT_EMBEDDING_DIMENSION, OllamaClient};
pub use service::EmbeddingService;

use crate::{Result, ThinkbookError};

/// Maps text to fixed-dimension float vectors.
///
/// Implementations are deterministic for a fixed model and safe to share
/// between notebooks. Calls may block, so async callers run them on the
/// blocking pool.
pub trait Embedder: Send + Sync {
    /// Embed every text, returning one vector per input in input order
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    #[inline]
    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| ThinkbookError::Embedding("embedder returned no vector".to_string()))
    }

    /// Identifier of the model, persisted alongside each index
    fn model_name(&self) -> &str;
}
