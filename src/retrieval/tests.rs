use super::*;
use crate::embeddings::{Embedder, EmbeddingService};
use crate::llm::Role;
use crate::{Result, ThinkbookError};
use chrono::Utc;
use std::sync::Arc;
use tempfile::TempDir;

fn retrieved(text: &str, source: &str, distance: f32) -> RetrievedChunk {
    RetrievedChunk {
        id: format!("id-{text}"),
        text: text.to_string(),
        metadata: crate::database::ChunkMetadata {
            source: source.to_string(),
            chunk_index: 0,
            created_at: Utc::now(),
        },
        distance,
    }
}

fn history(turns: usize) -> Vec<ChatMessage> {
    (0..turns)
        .map(|i| {
            if i % 2 == 0 {
                ChatMessage::user(format!("question {i}"))
            } else {
                ChatMessage::assistant(format!("answer {i}"))
            }
        })
        .collect()
}

struct TopicEmbedder;

impl Embedder for TopicEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                if t.contains("pie") || t.contains("dessert") {
                    vec![1.0, 0.0]
                } else {
                    vec![0.0, 1.0]
                }
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "topic"
    }
}

struct BrokenEmbedder;

impl Embedder for BrokenEmbedder {
    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(ThinkbookError::Embedding("offline".to_string()))
    }

    fn model_name(&self) -> &str {
        "broken"
    }
}

#[test]
fn blocks_are_numbered_in_rank_order() {
    let results = vec![
        retrieved("apple pie recipe", "cookbook.pdf", 0.1),
        retrieved("car engine repair", "manual.pdf", 0.9),
    ];

    assert_eq!(
        format_context(&results),
        "[Source 1: cookbook.pdf]\napple pie recipe\n\n---\n\n[Source 2: manual.pdf]\ncar engine repair"
    );
}

#[test]
fn empty_results_use_placeholder() {
    assert_eq!(format_context(&[]), NO_CONTEXT_PLACEHOLDER);

    let messages = RetrievalAssembler::default().assemble("anything?", &[], &[]);
    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages[1].content,
        "Context from documents:\n---\nNo relevant context found.\n---\n\nUser question: anything?"
    );
}

#[test]
fn prompt_layout() {
    let results = vec![retrieved("apple pie recipe", "cookbook.pdf", 0.1)];
    let history = history(2);

    let messages = RetrievalAssembler::default().assemble("How do I bake it?", &results, &history);

    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[0].content, SYSTEM_PROMPT);
    assert_eq!(&messages[1..3], history.as_slice());
    assert_eq!(messages[3].role, Role::User);
    assert!(
        messages[3]
            .content
            .starts_with("Context from documents:\n---\n[Source 1: cookbook.pdf]\napple pie recipe")
    );
    assert!(messages[3].content.ends_with("User question: How do I bake it?"));
}

#[test]
fn only_recent_history_is_kept() {
    let history = history(15);
    let messages = RetrievalAssembler::default().assemble("q", &[], &history);

    assert_eq!(messages.len(), 12);
    assert_eq!(messages[1].content, "answer 5");
    assert_eq!(messages[10].content, "question 14");
    assert_eq!(history.len(), 15);
}

#[test]
fn custom_system_prompt_and_history_window() {
    let assembler = RetrievalAssembler::new(1).with_system_prompt("Answer in French.");
    let messages = assembler.assemble("q", &[], &history(3));

    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].content, "Answer in French.");
    assert_eq!(messages[1].content, "question 2");

    let no_history = RetrievalAssembler::new(0).assemble("q", &[], &history(3));
    assert_eq!(no_history.len(), 2);
}

#[tokio::test]
async fn build_context_uses_nearest_chunks() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let embeddings = Arc::new(EmbeddingService::with_embedder(Arc::new(TopicEmbedder)));
    let index = VectorIndex::open(temp_dir.path(), embeddings)
        .await
        .expect("index should open");

    index
        .add_chunks(&["car engine repair".to_string()], "manual.pdf")
        .await
        .expect("add should succeed");
    index
        .add_chunks(&["apple pie recipe".to_string()], "cookbook.pdf")
        .await
        .expect("add should succeed");

    let messages = RetrievalAssembler::default()
        .build_context("dessert ideas", &index, &[], 1)
        .await
        .expect("context should build");

    assert_eq!(
        messages[1].content,
        "Context from documents:\n---\n[Source 1: cookbook.pdf]\napple pie recipe\n---\n\nUser question: dessert ideas"
    );
    assert_eq!(index.count().await.expect("count"), 2);
}

#[tokio::test]
async fn build_context_on_empty_index_uses_placeholder() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let embeddings = Arc::new(EmbeddingService::with_embedder(Arc::new(BrokenEmbedder)));
    let index = VectorIndex::open(temp_dir.path(), embeddings)
        .await
        .expect("index should open");

    let messages = RetrievalAssembler::default()
        .build_context("anything", &index, &[], 6)
        .await
        .expect("empty index should not fail");

    assert!(messages[1].content.contains(NO_CONTEXT_PLACEHOLDER));
}

#[tokio::test]
async fn build_context_propagates_embedding_failures() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    {
        let seeded = VectorIndex::open(
            temp_dir.path(),
            Arc::new(EmbeddingService::with_embedder(Arc::new(TopicEmbedder))),
        )
        .await
        .expect("index should open");
        seeded
            .add_chunks(&["apple pie recipe".to_string()], "cookbook.pdf")
            .await
            .expect("add should succeed");
        seeded.close().await;
    }

    let index = VectorIndex::open(
        temp_dir.path(),
        Arc::new(EmbeddingService::with_embedder(Arc::new(BrokenEmbedder))),
    )
    .await
    .expect("index should reopen");

    let result = RetrievalAssembler::default()
        .build_context("dessert", &index, &[], 6)
        .await;
    assert!(matches!(result, Err(ThinkbookError::Embedding(_))));
}
