
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embeddings::EmbeddingService;
use crate::embeddings::chunking::{Chunk, UNKNOWN_SOURCE};
use crate::{Result, ThinkbookError};

const DATABASE_FILENAME: &str = "vectors.db";
const DIMENSION_KEY: &str = "dimension";
const MODEL_KEY: &str = "embedding_model";

/// Source label recorded when `add_chunks` is given none
pub const DEFAULT_SOURCE_LABEL: &str = "Unknown Source";

/// Metadata stored with every chunk record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    /// Position of the chunk within the `add_chunks` call that inserted it
    pub chunk_index: usize,
    pub created_at: DateTime<Utc>,
}

/// A stored chunk returned by a search, nearest first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Squared Euclidean distance to the query vector
    pub distance: f32,
}

impl RetrievedChunk {
    #[inline]
    pub fn source(&self) -> &str {
        &self.metadata.source
    }
}

/// Number of records contributed by one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub source: String,
    pub chunks: usize,
}

/// Persistent nearest-neighbour index for a single notebook.
///
/// Records live in a SQLite database under the index location. Search is an
/// exact scan by squared Euclidean distance with ties broken by insertion
/// order. Writers are serialized by an exclusive lock; readers never take it.
#[derive(Debug)]
pub struct VectorIndex {
    pool: SqlitePool,
    location: PathBuf,
    embeddings: Arc<EmbeddingService>,
    write_lock: Mutex<()>,
}

fn storage_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> ThinkbookError {
    move |e| ThinkbookError::Storage(format!("{context}: {e}"))
}

/// Squared Euclidean distance between two vectors of equal length
#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8], dimension: usize) -> Result<Vec<f32>> {
    if bytes.len() != dimension * 4 {
        return Err(ThinkbookError::Storage(format!(
            "stored vector has {} bytes, expected {} for dimension {}",
            bytes.len(),
            dimension * 4,
            dimension
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

impl VectorIndex {
    /// Attach to the index rooted at `location`, creating it if absent.
    ///
    /// Opening the same location again sees the same records. The embedding
    /// capability is not loaded until the first insertion or query.
    #[inline]
    pub async fn open<P: AsRef<Path>>(location: P, embeddings: Arc<EmbeddingService>) -> Result<Self> {
        let location = location.as_ref().to_path_buf();

        tokio::fs::create_dir_all(&location).await.map_err(|e| {
            ThinkbookError::Storage(format!(
                "failed to create index directory {}: {e}",
                location.display()
            ))
        })?;

        let options = SqliteConnectOptions::new()
            .filename(location.join(DATABASE_FILENAME))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(storage_error("failed to open vector index"))?;

        sqlx::migrate!("src/database/migrations")
            .run(&pool)
            .await
            .map_err(|e| ThinkbookError::Storage(format!("failed to migrate vector index: {e}")))?;

        let index = Self {
            pool,
            location,
            embeddings,
            write_lock: Mutex::new(()),
        };

        debug!(
            "Opened vector index at {} ({} records)",
            index.location.display(),
            index.count().await?
        );

        Ok(index)
    }

    #[inline]
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Embed `chunks` and append them in order, all labelled `source_label`.
    ///
    /// Either every chunk is stored or none is.
    ///
    /// # Errors
    ///
    /// - [`ThinkbookError::Embedding`] when the embedder fails for any chunk
    /// - [`ThinkbookError::Config`] when a vector's dimension disagrees with
    ///   the rest of the batch or with the index
    /// - [`ThinkbookError::Storage`] when the write fails
    #[inline]
    pub async fn add_chunks(&self, chunks: &[String], source_label: &str) -> Result<()> {
        let source = if source_label.trim().is_empty() {
            DEFAULT_SOURCE_LABEL
        } else {
            source_label
        };

        let entries: Vec<(String, String)> = chunks
            .iter()
            .map(|text| (text.clone(), source.to_string()))
            .collect();
        self.insert(entries).await
    }

    /// Append chunks produced by the chunker, keeping each chunk's own label
    #[inline]
    pub async fn add_document_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let entries: Vec<(String, String)> = chunks
            .iter()
            .map(|chunk| {
                let source = if chunk.source_label.trim().is_empty() {
                    UNKNOWN_SOURCE.to_string()
                } else {
                    chunk.source_label.clone()
                };
                (chunk.text.clone(), source)
            })
            .collect();
        self.insert(entries).await
    }

    async fn insert(&self, entries: Vec<(String, String)>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = entries.iter().map(|(text, _)| text.clone()).collect();
        let vectors = self.embeddings.embed_batch(texts).await?;

        let dimension = vectors.first().map_or(0, Vec::len);
        if dimension == 0 {
            return Err(ThinkbookError::Embedding(
                "embedder returned an empty vector".to_string(),
            ));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(ThinkbookError::Config(format!(
                "embedding dimension mismatch within batch: {} vs {}",
                bad.len(),
                dimension
            )));
        }

        let model = self.embeddings.model_name().await?;
        let _guard = self.write_lock.lock().await;

        // Other handles on this location may record settings concurrently,
        // so they are only read inside the write transaction.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage_error("failed to begin transaction"))?;

        let established = parse_dimension(read_meta(&mut *tx, DIMENSION_KEY).await?)?;
        match established {
            Some(existing) if existing != dimension => {
                return Err(ThinkbookError::Config(format!(
                    "embedding dimension {dimension} does not match index dimension {existing}"
                )));
            }
            _ => {}
        }

        if established.is_some() {
            match read_meta(&mut *tx, MODEL_KEY).await? {
                Some(stored_model) if stored_model != model => warn!(
                    "Index at {} was built with model {} but {} is in use",
                    self.location.display(),
                    stored_model,
                    model
                ),
                _ => {}
            }
        }

        if established.is_none() {
            for (key, value) in [(DIMENSION_KEY, dimension.to_string()), (MODEL_KEY, model)] {
                sqlx::query("INSERT INTO index_meta (key, value) VALUES (?1, ?2)")
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_error("failed to record index settings"))?;
            }
        }

        let created_at = Utc::now();
        for (chunk_index, ((text, source), vector)) in entries.into_iter().zip(&vectors).enumerate()
        {
            let metadata = ChunkMetadata {
                source,
                chunk_index,
                created_at,
            };
            let metadata_json = serde_json::to_string(&metadata)
                .map_err(|e| ThinkbookError::Storage(format!("failed to encode metadata: {e}")))?;

            sqlx::query("INSERT INTO chunks (id, text, metadata, vector) VALUES (?1, ?2, ?3, ?4)")
                .bind(Uuid::new_v4().to_string())
                .bind(text)
                .bind(metadata_json)
                .bind(encode_vector(vector))
                .execute(&mut *tx)
                .await
                .map_err(storage_error("failed to insert chunk"))?;
        }

        tx.commit()
            .await
            .map_err(storage_error("failed to commit chunks"))?;

        info!(
            "Indexed {} chunks ({} dimensions) at {}",
            vectors.len(),
            dimension,
            self.location.display()
        );

        Ok(())
    }

    /// The `top_k` records nearest to `query`, nearest first.
    ///
    /// An index with no records yields an empty result without touching the
    /// embedder.
    #[inline]
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>> {
        if top_k == 0 || self.dimension().await?.is_none() || self.count().await? == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embeddings.embed_one(query).await?;
        self.search_vector(&query_vector, top_k).await
    }

    /// Text-only form of [`VectorIndex::search`]
    #[inline]
    pub async fn search_texts(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        Ok(self
            .search(query, top_k)
            .await?
            .into_iter()
            .map(|chunk| chunk.text)
            .collect())
    }

    /// The `top_k` records nearest to a precomputed query vector
    #[inline]
    pub async fn search_vector(&self, query: &[f32], top_k: usize) -> Result<Vec<RetrievedChunk>> {
        let Some(dimension) = self.dimension().await? else {
            return Ok(Vec::new());
        };
        if top_k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != dimension {
            return Err(ThinkbookError::Config(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                dimension
            )));
        }

        let rows = sqlx::query("SELECT id, text, metadata, vector FROM chunks ORDER BY seq")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error("failed to read chunks"))?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row
                .try_get("vector")
                .map_err(storage_error("failed to read vector"))?;
            let vector = decode_vector(&blob, dimension)?;
            let metadata_json: String = row
                .try_get("metadata")
                .map_err(storage_error("failed to read metadata"))?;
            let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
                .map_err(|e| ThinkbookError::Storage(format!("corrupted chunk metadata: {e}")))?;

            scored.push(RetrievedChunk {
                id: row.try_get("id").map_err(storage_error("failed to read id"))?,
                text: row
                    .try_get("text")
                    .map_err(storage_error("failed to read text"))?,
                metadata,
                distance: squared_l2(query, &vector),
            });
        }

        // stable: equal distances keep insertion order
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(top_k);

        debug!(
            "Search over {} records returned {} results",
            rows.len(),
            scored.len()
        );

        Ok(scored)
    }

    #[inline]
    pub async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error("failed to count chunks"))?;

        Ok(usize::try_from(count).unwrap_or(0))
    }

    #[inline]
    pub async fn is_ready(&self) -> Result<bool> {
        Ok(self.count().await? > 0)
    }

    /// Vector dimension fixed by the first insertion, if any
    #[inline]
    pub async fn dimension(&self) -> Result<Option<usize>> {
        parse_dimension(self.meta_value(DIMENSION_KEY).await?)
    }

    /// Embedding model recorded at the first insertion, if any
    #[inline]
    pub async fn embedding_model(&self) -> Result<Option<String>> {
        self.meta_value(MODEL_KEY).await
    }

    /// Record counts per source, in order of first insertion
    #[inline]
    pub async fn sources(&self) -> Result<Vec<SourceSummary>> {
        let rows = sqlx::query(
            "SELECT json_extract(metadata, '$.source') AS source, COUNT(*) AS chunks
             FROM chunks
             GROUP BY source
             ORDER BY MIN(seq)",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error("failed to list sources"))?;

        rows.iter()
            .map(|row| -> Result<SourceSummary> {
                let source: Option<String> = row
                    .try_get("source")
                    .map_err(storage_error("failed to read source"))?;
                let chunks: i64 = row
                    .try_get("chunks")
                    .map_err(storage_error("failed to read source count"))?;
                Ok(SourceSummary {
                    source: source.unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
                    chunks: usize::try_from(chunks).unwrap_or(0),
                })
            })
            .collect()
    }

    /// Close every connection; later operations fail with a storage error
    #[inline]
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Closed vector index at {}", self.location.display());
    }

    async fn meta_value(&self, key: &'static str) -> Result<Option<String>> {
        read_meta(&self.pool, key).await
    }
}

async fn read_meta<'e, E>(executor: E, key: &'static str) -> Result<Option<String>>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?1")
        .bind(key)
        .fetch_optional(executor)
        .await
        .map_err(storage_error("failed to read index settings"))
}

fn parse_dimension(value: Option<String>) -> Result<Option<usize>> {
    value
        .map(|value| {
            value.parse::<usize>().map_err(|e| {
                ThinkbookError::Storage(format!("corrupted index dimension {value:?}: {e}"))
            })
        })
        .transpose()
}
