use super::*;
use crate::embeddings::Embedder;
use tempfile::TempDir;

/// Embeds a text as `[word count, character count]`
struct LengthEmbedder;

impl Embedder for LengthEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| vec![t.split_whitespace().count() as f32, t.len() as f32])
            .collect())
    }

    fn model_name(&self) -> &str {
        "length"
    }
}

fn scope(temp_dir: &TempDir) -> NotebookScope {
    NotebookScope::new(
        temp_dir.path(),
        Arc::new(EmbeddingService::with_embedder(Arc::new(LengthEmbedder))),
    )
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[test]
fn storage_layout() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let scope = scope(&temp_dir);

    let location = scope
        .storage_location("alice", "nb-1")
        .expect("location should resolve");
    assert_eq!(
        location,
        temp_dir
            .path()
            .join("users")
            .join("alice")
            .join("notebooks")
            .join("nb-1")
            .join("index")
    );
}

#[test]
fn distinct_ids_never_share_a_location() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let scope = scope(&temp_dir);

    let pairs = [
        ("alice", "nb"),
        ("alice", "nb/x"),
        ("alice/notebooks/nb", "x"),
        ("alice", "nb x"),
        ("alice", "nb+x"),
        ("bob", "nb"),
        ("a", "b/c"),
        ("a/b", "c"),
    ];

    let locations: std::collections::HashSet<PathBuf> = pairs
        .iter()
        .map(|(user, notebook)| {
            scope
                .storage_location(user, notebook)
                .expect("location should resolve")
        })
        .collect();
    assert_eq!(locations.len(), pairs.len());

    for location in &locations {
        assert!(location.starts_with(temp_dir.path().join("users")));
    }
}

#[tokio::test]
async fn ids_differing_only_in_case_stay_apart() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let scope = scope(&temp_dir);

    let upper = scope
        .storage_location("Alice", "Biology")
        .expect("location should resolve");
    let lower = scope
        .storage_location("alice", "biology")
        .expect("location should resolve");
    assert_ne!(
        upper.to_string_lossy().to_lowercase(),
        lower.to_string_lossy().to_lowercase()
    );

    scope
        .open_index("alice", "Biology")
        .await
        .expect("can open upper-case notebook");
    scope
        .open_index("alice", "biology")
        .await
        .expect("can open lower-case notebook");
    assert_eq!(
        scope.notebooks("alice").await.expect("can list notebooks"),
        vec!["Biology", "biology"]
    );
}

#[test]
fn mapping_is_deterministic() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let first = scope(&temp_dir);
    let second = scope(&temp_dir);

    assert_eq!(
        first.storage_location("u", "n").expect("location"),
        second.storage_location("u", "n").expect("location")
    );
}

#[test]
fn path_like_ids_are_rejected() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let scope = scope(&temp_dir);

    for (user, notebook) in [("", "nb"), ("alice", ""), (".", "nb"), ("alice", "..")] {
        assert!(matches!(
            scope.storage_location(user, notebook),
            Err(ThinkbookError::Config(_))
        ));
    }
}

#[tokio::test]
async fn open_index_is_shared_per_notebook() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let scope = scope(&temp_dir);

    let first = scope.open_index("alice", "nb").await.expect("open");
    let second = scope.open_index("alice", "nb").await.expect("open");
    let other = scope.open_index("alice", "other").await.expect("open");

    assert!(Arc::ptr_eq(&first, &second));
    assert!(!Arc::ptr_eq(&first, &other));
}

#[tokio::test]
async fn notebooks_are_isolated() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let scope = scope(&temp_dir);

    let x = scope.open_index("alice", "x").await.expect("open x");
    let y = scope.open_index("alice", "y").await.expect("open y");
    let bob_x = scope.open_index("bob", "x").await.expect("open bob x");

    x.add_chunks(&strings(&["secret of notebook x"]), "x.txt")
        .await
        .expect("add should succeed");
    y.add_chunks(&strings(&["public", "notes of notebook y"]), "y.txt")
        .await
        .expect("add should succeed");

    let y_hits = y.search("secret of notebook x", 5).await.expect("search y");
    assert_eq!(y_hits.len(), 2);
    assert!(y_hits.iter().all(|hit| hit.source() == "y.txt"));
    assert!(
        bob_x
            .search("secret of notebook x", 5)
            .await
            .expect("search bob x")
            .is_empty()
    );

    let hits = x.search("secret of notebook x", 5).await.expect("search x");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source(), "x.txt");
}

#[tokio::test]
async fn destroy_removes_everything() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let scope = scope(&temp_dir);

    let index = scope.open_index("alice", "nb").await.expect("open");
    index
        .add_chunks(&strings(&["stale record"]), "old.txt")
        .await
        .expect("add should succeed");
    scope
        .save_raw_file("alice", "nb", "old.txt", b"stale record")
        .await
        .expect("raw file should save");
    drop(index);

    assert!(scope.destroy_index("alice", "nb").await.expect("destroy"));
    assert!(
        !scope
            .notebook_dir("alice", "nb")
            .expect("dir")
            .exists()
    );

    let reopened = scope.open_index("alice", "nb").await.expect("reopen");
    assert_eq!(reopened.count().await.expect("count"), 0);
    assert!(
        reopened
            .search("stale record", 5)
            .await
            .expect("search")
            .is_empty()
    );
}

#[tokio::test]
async fn destroy_missing_notebook_returns_false() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let scope = scope(&temp_dir);

    assert!(!scope.destroy_index("nobody", "nothing").await.expect("destroy"));
}

#[tokio::test]
async fn destroyed_handle_cannot_resurrect_records() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let scope = scope(&temp_dir);

    let held = scope.open_index("alice", "nb").await.expect("open");
    held.add_chunks(&strings(&["one"]), "a")
        .await
        .expect("add should succeed");

    assert!(scope.destroy_index("alice", "nb").await.expect("destroy"));

    let write_after_destroy = held.add_chunks(&strings(&["two"]), "a").await;
    assert!(matches!(
        write_after_destroy,
        Err(ThinkbookError::Storage(_))
    ));
}

#[tokio::test]
async fn extracted_texts_round_trip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let scope = scope(&temp_dir);

    scope
        .save_extracted_text("alice", "nb", "b-notes.pdf", "second document")
        .await
        .expect("save");
    scope
        .save_extracted_text("alice", "nb", "a notes.txt", "first document")
        .await
        .expect("save");

    let documents = scope.extracted_texts("alice", "nb").await.expect("list");
    assert_eq!(
        documents,
        vec![
            ExtractedDocument {
                name: "a notes.txt".to_string(),
                text: "first document".to_string()
            },
            ExtractedDocument {
                name: "b-notes.pdf".to_string(),
                text: "second document".to_string()
            },
        ]
    );

    assert!(
        scope
            .extracted_texts("alice", "empty")
            .await
            .expect("list")
            .is_empty()
    );
}

#[tokio::test]
async fn raw_files_stay_inside_the_notebook() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let scope = scope(&temp_dir);

    let path = scope
        .save_raw_file("alice", "nb", "../../escape.txt", b"data")
        .await
        .expect("save");

    assert!(path.starts_with(scope.notebook_dir("alice", "nb").expect("dir")));
    assert_eq!(std::fs::read(&path).expect("read"), b"data");
}

#[tokio::test]
async fn notebooks_are_listed_by_id() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let scope = scope(&temp_dir);

    scope.open_index("alice", "zeta notes").await.expect("open");
    scope.open_index("alice", "alpha/1").await.expect("open");
    scope.open_index("bob", "other").await.expect("open");

    assert_eq!(
        scope.notebooks("alice").await.expect("list"),
        vec!["alpha/1".to_string(), "zeta notes".to_string()]
    );
    assert!(scope.notebooks("carol").await.expect("list").is_empty());
}

#[tokio::test]
async fn existing_index_never_creates_storage() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let scope = scope(&temp_dir);

    assert!(
        scope
            .existing_index("alice", "missing")
            .await
            .expect("lookup should succeed")
            .is_none()
    );
    assert!(!scope.exists("alice", "missing").await.expect("can check"));
    assert!(!temp_dir.path().join(USERS_DIR).exists());
    assert!(
        scope
            .notebooks("alice")
            .await
            .expect("can list notebooks")
            .is_empty()
    );
}

#[tokio::test]
async fn existing_index_finds_created_notebooks() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = temp_dir.path().to_path_buf();

    {
        let scope = NotebookScope::new(
            &location,
            Arc::new(EmbeddingService::with_embedder(Arc::new(LengthEmbedder))),
        );
        let index = scope
            .open_index("alice", "biology")
            .await
            .expect("can open index");
        index
            .add_chunks(&strings(&["cells divide"]), "notes.txt")
            .await
            .expect("can add chunks");
        let cached = scope
            .existing_index("alice", "biology")
            .await
            .expect("lookup should succeed")
            .expect("notebook should exist");
        assert!(Arc::ptr_eq(&index, &cached));
        index.close().await;
    }

    let reopened = scope(&temp_dir);
    assert!(reopened.exists("alice", "biology").await.expect("can check"));
    let index = reopened
        .existing_index("alice", "biology")
        .await
        .expect("lookup should succeed")
        .expect("notebook should exist on disk");
    assert_eq!(index.count().await.expect("can count"), 1);
}
