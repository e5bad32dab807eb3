// Notebook pipeline
// Ingestion, grounded chat and study artifacts over one NotebookScope


use itertools::Itertools;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::{RetrievedChunk, SourceSummary, VectorIndex};
use crate::embeddings::{ChunkingConfig, EmbeddingService, chunk_document};
use crate::extraction::{BasicExtractor, SourceData, SourceType, TextExtractor, ensure_min_text};
use crate::llm::{ChatMessage, LanguageModel, LanguageModelConfig, OllamaChat, TokenStream};
use crate::notebook::{NotebookKey, NotebookScope};
use crate::retrieval::{RetrievalAssembler, RetrievalConfig};
use crate::studio::{Artifact, ArtifactCache, ArtifactKey, generate_artifact};
use crate::{Result, ThinkbookError};

const HISTORY_FILE: &str = "chat_history.jsonl";
const DOCUMENT_SEPARATOR: &str = "\n\n";
const STREAM_BUFFER: usize = 64;

/// A document handed to [`NotebookPipeline::ingest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Label recorded as the `source` of every chunk
    pub name: String,
    pub source_type: SourceType,
    pub data: SourceData,
}

impl SourceDocument {
    #[inline]
    pub fn from_bytes(name: impl Into<String>, source_type: SourceType, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            source_type,
            data: SourceData::Bytes(bytes),
        }
    }

    /// A web page, labelled with its URL
    #[inline]
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            name: url.clone(),
            source_type: SourceType::Url,
            data: SourceData::Url(url),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub source: String,
    pub chunks: usize,
    /// Characters of extracted text
    pub characters: usize,
}

/// Snapshot of a notebook's index; all defaults for a notebook that does not exist
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotebookStatus {
    pub chunks: usize,
    pub ready: bool,
    pub dimension: Option<usize>,
    pub embedding_model: Option<String>,
    pub sources: Vec<SourceSummary>,
}

/// Tokens of an answer in the order the model produces them
#[derive(Debug)]
pub struct AnswerStream {
    receiver: mpsc::Receiver<Result<String>>,
}

impl AnswerStream {
    /// The next token, or `None` once the answer is complete or has failed
    #[inline]
    pub async fn next_token(&mut self) -> Option<Result<String>> {
        self.receiver.recv().await
    }

    /// Join the remaining tokens, stopping at the first error
    #[inline]
    pub async fn into_answer(mut self) -> Result<String> {
        let mut answer = String::new();
        while let Some(token) = self.next_token().await {
            answer.push_str(&token?);
        }
        Ok(answer)
    }
}

/// Ties a [`NotebookScope`] to the extraction and language-model
/// collaborators.
///
/// Every operation is addressed by `(user, notebook)`; notebooks never see
/// each other's chunks, files, history or cached artifacts.
pub struct NotebookPipeline {
    scope: Arc<NotebookScope>,
    extractor: Arc<dyn TextExtractor>,
    model: Arc<dyn LanguageModel>,
    chunking: ChunkingConfig,
    retrieval: RetrievalConfig,
    language_model: LanguageModelConfig,
    assembler: RetrievalAssembler,
    artifacts: ArtifactCache,
}

impl fmt::Debug for NotebookPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotebookPipeline")
            .field("root", &self.scope.root())
            .field("chunking", &self.chunking)
            .field("retrieval", &self.retrieval)
            .field("language_model", &self.language_model)
            .finish_non_exhaustive()
    }
}

impl NotebookPipeline {
    #[inline]
    pub fn new(
        scope: Arc<NotebookScope>,
        extractor: Arc<dyn TextExtractor>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        let retrieval = RetrievalConfig::default();
        Self {
            scope,
            extractor,
            model,
            chunking: ChunkingConfig::default(),
            assembler: RetrievalAssembler::new(retrieval.history_turns),
            retrieval,
            language_model: LanguageModelConfig::default(),
            artifacts: ArtifactCache::new(),
        }
    }

    /// Ollama-backed pipeline rooted at the configured data directory
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        let embeddings = Arc::new(EmbeddingService::ollama(config.ollama.clone()));
        let scope = Arc::new(NotebookScope::new(config.data_dir()?, embeddings));
        let model = OllamaChat::new(&config.ollama, &config.language_model.model)?;

        Ok(Self::new(scope, Arc::new(BasicExtractor::default()), Arc::new(model))
            .with_chunking(config.chunking)
            .with_retrieval(config.retrieval)
            .with_language_model(config.language_model.clone()))
    }

    #[inline]
    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    #[inline]
    pub fn with_retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.assembler = RetrievalAssembler::new(retrieval.history_turns);
        self.retrieval = retrieval;
        self
    }

    #[inline]
    pub fn with_language_model(mut self, language_model: LanguageModelConfig) -> Self {
        self.language_model = language_model;
        self
    }

    #[inline]
    pub fn scope(&self) -> &Arc<NotebookScope> {
        &self.scope
    }

    /// Extract, chunk and index a document, then keep its files with the
    /// notebook.
    ///
    /// Nothing is indexed or stored when extraction yields less than the
    /// configured minimum amount of text.
    #[inline]
    pub async fn ingest(
        &self,
        user_id: &str,
        notebook_id: &str,
        document: SourceDocument,
    ) -> Result<IngestReport> {
        let SourceDocument {
            name,
            source_type,
            data,
        } = document;

        debug!("Extracting {} as {}", name, source_type);
        let extractor = Arc::clone(&self.extractor);
        let (text, data) = tokio::task::spawn_blocking(move || {
            let text = extractor.extract(source_type, &data);
            (text, data)
        })
        .await
        .map_err(|e| ThinkbookError::Extraction(format!("extraction task failed: {e}")))?;
        let text = text?;

        ensure_min_text(&text, self.retrieval.min_extracted_chars)?;

        let chunks = chunk_document(&text, &name, &self.chunking)?;
        let index = self.scope.open_index(user_id, notebook_id).await?;
        index.add_document_chunks(&chunks).await?;

        if let SourceData::Bytes(bytes) = &data {
            self.scope
                .save_raw_file(user_id, notebook_id, &name, bytes)
                .await?;
        }
        self.scope
            .save_extracted_text(user_id, notebook_id, &name, &text)
            .await?;

        let dropped = self
            .artifacts
            .invalidate(&NotebookKey::new(user_id, notebook_id));
        if dropped > 0 {
            debug!("Dropped {} cached artifacts", dropped);
        }

        info!(
            "Ingested {} into {}/{}: {} chunks",
            name,
            user_id,
            notebook_id,
            chunks.len()
        );

        Ok(IngestReport {
            source: name,
            chunks: chunks.len(),
            characters: text.chars().count(),
        })
    }

    /// Nearest chunks of a notebook, `top_k` defaulting to the configured value
    #[inline]
    pub async fn search(
        &self,
        user_id: &str,
        notebook_id: &str,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<RetrievedChunk>> {
        let Some(index) = self.scope.existing_index(user_id, notebook_id).await? else {
            debug!("Searching missing notebook {}/{}", user_id, notebook_id);
            return Ok(Vec::new());
        };
        index
            .search(query, top_k.unwrap_or(self.retrieval.top_k))
            .await
    }

    /// Prompt for a grounded answer to `question`.
    ///
    /// A notebook that does not exist contributes no context and is not
    /// created.
    #[inline]
    pub async fn prepare_chat(
        &self,
        user_id: &str,
        notebook_id: &str,
        question: &str,
        history: &[ChatMessage],
    ) -> Result<Vec<ChatMessage>> {
        let Some(index) = self.scope.existing_index(user_id, notebook_id).await? else {
            return Ok(self.assembler.assemble(question, &[], history));
        };
        self.assembler
            .build_context(question, &index, history, self.retrieval.context_top_k)
            .await
    }

    /// Answer `question` from the notebook's documents
    #[inline]
    pub async fn chat(
        &self,
        user_id: &str,
        notebook_id: &str,
        question: &str,
        history: &[ChatMessage],
    ) -> Result<String> {
        let index = self.require_index(user_id, notebook_id).await?;
        let messages = self
            .assembler
            .build_context(question, &index, history, self.retrieval.context_top_k)
            .await?;
        let model = Arc::clone(&self.model);
        let options = self.language_model.chat_options();

        tokio::task::spawn_blocking(move || model.complete(&messages, &options))
            .await
            .map_err(|e| ThinkbookError::LanguageModel(format!("chat task failed: {e}")))?
    }

    /// Like [`NotebookPipeline::chat`], handing out tokens as they arrive.
    ///
    /// Failures of the model, including a failure to start, arrive as the
    /// last item of the stream.
    #[inline]
    pub async fn chat_stream(
        &self,
        user_id: &str,
        notebook_id: &str,
        question: &str,
        history: &[ChatMessage],
    ) -> Result<AnswerStream> {
        let index = self.require_index(user_id, notebook_id).await?;
        let messages = self
            .assembler
            .build_context(question, &index, history, self.retrieval.context_top_k)
            .await?;
        let model = Arc::clone(&self.model);
        let options = self.language_model.chat_options();

        let (sender, receiver) = mpsc::channel(STREAM_BUFFER);
        tokio::task::spawn_blocking(move || {
            let tokens = model
                .stream(&messages, &options)
                .unwrap_or_else(|e| -> TokenStream { Box::new(std::iter::once(Err(e))) });
            for token in tokens {
                let failed = token.is_err();
                if sender.blocking_send(token).is_err() {
                    debug!("Answer stream dropped before the model finished");
                    break;
                }
                if failed {
                    break;
                }
            }
        });

        Ok(AnswerStream { receiver })
    }

    /// Stored conversation of a notebook, oldest first
    #[inline]
    pub async fn history(&self, user_id: &str, notebook_id: &str) -> Result<Vec<ChatMessage>> {
        let path = self.history_path(user_id, notebook_id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let mut messages = Vec::new();
        for line in content.lines().filter(|line| !line.trim().is_empty()) {
            match serde_json::from_str::<ChatMessage>(line) {
                Ok(message) => messages.push(message),
                Err(e) => warn!("Skipping unreadable history entry in {}: {}", path.display(), e),
            }
        }
        Ok(messages)
    }

    /// Append one question and its answer to the notebook's conversation
    #[inline]
    pub async fn record_exchange(
        &self,
        user_id: &str,
        notebook_id: &str,
        question: &str,
        answer: &str,
    ) -> Result<()> {
        if !self.scope.exists(user_id, notebook_id).await? {
            return Err(not_found(user_id, notebook_id));
        }
        let path = self.history_path(user_id, notebook_id)?;

        let mut entries = String::new();
        for message in [ChatMessage::user(question), ChatMessage::assistant(answer)] {
            let line = serde_json::to_string(&message)
                .map_err(|e| ThinkbookError::Storage(format!("failed to encode history: {e}")))?;
            entries.push_str(&line);
            entries.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(entries.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    #[inline]
    pub async fn status(&self, user_id: &str, notebook_id: &str) -> Result<NotebookStatus> {
        let Some(index) = self.scope.existing_index(user_id, notebook_id).await? else {
            return Ok(NotebookStatus::default());
        };
        Ok(NotebookStatus {
            chunks: index.count().await?,
            ready: index.is_ready().await?,
            dimension: index.dimension().await?,
            embedding_model: index.embedding_model().await?,
            sources: index.sources().await?,
        })
    }

    /// Remove a notebook with everything stored for it
    #[inline]
    pub async fn delete_notebook(&self, user_id: &str, notebook_id: &str) -> Result<bool> {
        self.artifacts
            .invalidate(&NotebookKey::new(user_id, notebook_id));
        self.scope.destroy_index(user_id, notebook_id).await
    }

    /// A study artifact over every document of the notebook, generated once
    /// and then served from the cache until the notebook changes
    #[inline]
    pub async fn generate_artifact(
        &self,
        user_id: &str,
        notebook_id: &str,
        key: ArtifactKey,
    ) -> Result<Artifact> {
        let notebook = NotebookKey::new(user_id, notebook_id);
        if let Some(artifact) = self.artifacts.lookup(&notebook, &key) {
            debug!("Serving cached {} for {}/{}", key, user_id, notebook_id);
            return Ok(artifact);
        }

        let documents = self.scope.extracted_texts(user_id, notebook_id).await?;
        if documents.is_empty() {
            return Err(ThinkbookError::Extraction(format!(
                "notebook {notebook_id} has no documents"
            )));
        }
        let text = documents
            .iter()
            .map(|document| document.text.as_str())
            .join(DOCUMENT_SEPARATOR);

        info!(
            "Generating {} from {} documents of {}/{}",
            key,
            documents.len(),
            user_id,
            notebook_id
        );
        let model = Arc::clone(&self.model);
        let artifact =
            tokio::task::spawn_blocking(move || generate_artifact(model.as_ref(), &key, &text))
                .await
                .map_err(|e| {
                    ThinkbookError::LanguageModel(format!("artifact task failed: {e}"))
                })??;

        self.artifacts.insert(&notebook, key, artifact.clone());
        Ok(artifact)
    }

    async fn require_index(&self, user_id: &str, notebook_id: &str) -> Result<Arc<VectorIndex>> {
        self.scope
            .existing_index(user_id, notebook_id)
            .await?
            .ok_or_else(|| not_found(user_id, notebook_id))
    }

    fn history_path(&self, user_id: &str, notebook_id: &str) -> Result<PathBuf> {
        Ok(self
            .scope
            .notebook_dir(user_id, notebook_id)?
            .join(HISTORY_FILE))
    }
}

fn not_found(user_id: &str, notebook_id: &str) -> ThinkbookError {
    ThinkbookError::NotebookNotFound(format!("{notebook_id} of user {user_id}"))
}
