use thiserror::Error;

pub type Result<T> = std::result::Result<T, ThinkbookError>;

#[derive(Error, Debug)]
pub enum ThinkbookError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notebook not found: {0}")]
    NotebookNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Language model error: {0}")]
    LanguageModel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod extraction;
pub mod http;
pub mod llm;
pub mod notebook;
pub mod pipeline;
pub mod retrieval;
pub mod studio;
