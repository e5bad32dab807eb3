
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, ThinkbookError};

/// Source label used when a document carries no name
pub const UNKNOWN_SOURCE: &str = "Unknown";

/// A contiguous word-window of a document's extracted text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Words of the window joined with single spaces
    pub text: String,
    pub word_count: usize,
    /// Originating document, filename or URL
    pub source_label: String,
}

/// Word-window parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Words per chunk
    pub chunk_size: usize,
    /// Words shared by adjacent chunks; must be smaller than `chunk_size`
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}

impl ChunkingConfig {
    /// Distance in words between the starts of consecutive windows
    #[inline]
    pub fn step(&self) -> Result<usize> {
        if self.chunk_size == 0 {
            return Err(ThinkbookError::Config(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(ThinkbookError::Config(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(self.chunk_size - self.overlap)
    }
}

/// Split `text` into overlapping windows of `chunk_size` whitespace-separated
/// words, advancing `chunk_size - overlap` words at a time.
///
/// The final window is clipped at the end of the input and no window starts
/// after one has already reached the end, so a text of `N > chunk_size` words
/// yields `ceil((N - overlap) / (chunk_size - overlap))` chunks and any
/// non-empty text of at most `chunk_size` words yields exactly one.
///
/// # Errors
///
/// Returns [`ThinkbookError::Config`] when `chunk_size` is zero or `overlap`
/// is not smaller than `chunk_size`.
#[inline]
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    let config = ChunkingConfig {
        chunk_size,
        overlap,
    };
    let step = config.step()?;

    let words: Vec<&str> = text.split_whitespace().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        let chunk = words[start..end].join(" ");
        if !chunk.trim().is_empty() {
            chunks.push(chunk);
        }
        if end == words.len() {
            break;
        }
        start += step;
    }

    debug!(
        "Chunked {} words into {} chunks (size {}, overlap {})",
        words.len(),
        chunks.len(),
        chunk_size,
        overlap
    );

    Ok(chunks)
}

/// Chunk a document and attach its source label to every window.
///
/// An empty or whitespace-only label is recorded as [`UNKNOWN_SOURCE`].
#[inline]
pub fn chunk_document(text: &str, source_label: &str, config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    let source_label = if source_label.trim().is_empty() {
        UNKNOWN_SOURCE
    } else {
        source_label
    };

    let chunks = chunk_text(text, config.chunk_size, config.overlap)?
        .into_iter()
        .map(|text| Chunk {
            word_count: text.split_whitespace().count(),
            text,
            source_label: source_label.to_string(),
        })
        .collect();

    Ok(chunks)
}

/// Number of chunks [`chunk_text`] produces for a text of `word_count` words
#[inline]
pub fn expected_chunk_count(word_count: usize, config: &ChunkingConfig) -> Result<usize> {
    let step = config.step()?;
    Ok(match word_count {
        0 => 0,
        n if n <= config.chunk_size => 1,
        n => (n - config.overlap).div_ceil(step),
    })
}
