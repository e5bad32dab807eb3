// Database module
// Per-notebook vector storage backed by SQLite

pub mod vector_index;

pub use vector_index::{
    ChunkMetadata, DEFAULT_SOURCE_LABEL, RetrievedChunk, SourceSummary, VectorIndex, squared_l2,
};
