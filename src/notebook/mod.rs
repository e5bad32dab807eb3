#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::form_urlencoded;

use crate::database::VectorIndex;
use crate::embeddings::EmbeddingService;
use crate::{Result, ThinkbookError};

const USERS_DIR: &str = "users";
const NOTEBOOKS_DIR: &str = "notebooks";
const INDEX_DIR: &str = "index";
const RAW_FILES_DIR: &str = "files_raw";
const EXTRACTED_FILES_DIR: &str = "files_extracted";
const EXTRACTED_EXTENSION: &str = "txt";

/// Identifies one notebook of one user
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NotebookKey {
    pub user_id: String,
    pub notebook_id: String,
}

impl NotebookKey {
    #[inline]
    pub fn new(user_id: &str, notebook_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            notebook_id: notebook_id.to_string(),
        }
    }
}

/// An extracted document stored with a notebook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub name: String,
    pub text: String,
}

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Encode an id so it is a single, reversible path component.
///
/// ASCII capitals are percent-encoded as well, so two ids that differ only in
/// case still map to distinct names on case-insensitive filesystems.
fn encode_component(kind: &str, value: &str) -> Result<String> {
    if value.is_empty() || value == "." || value == ".." {
        return Err(ThinkbookError::Config(format!("invalid {kind}: {value:?}")));
    }

    let mut encoded = String::with_capacity(value.len());
    let mut buffer = [0; 4];
    for ch in value.chars() {
        if ch.is_ascii_uppercase() {
            let byte = ch as u8;
            encoded.push('%');
            encoded.push(char::from(HEX_DIGITS[usize::from(byte >> 4)]));
            encoded.push(char::from(HEX_DIGITS[usize::from(byte & 0x0F)]));
        } else {
            encoded.extend(form_urlencoded::byte_serialize(
                ch.encode_utf8(&mut buffer).as_bytes(),
            ));
        }
    }
    Ok(encoded)
}

fn decode_component(encoded: &str) -> Option<String> {
    form_urlencoded::parse(encoded.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
}

/// Owns the mapping from `(user, notebook)` to on-disk storage and keeps one
/// open [`VectorIndex`] per notebook.
///
/// Every notebook lives under
/// `<root>/users/<user>/notebooks/<notebook>/` with its index in `index/`.
/// Callers opening the same notebook share one index and therefore one
/// write lock.
#[derive(Debug)]
pub struct NotebookScope {
    root: PathBuf,
    embeddings: Arc<EmbeddingService>,
    indices: Mutex<HashMap<NotebookKey, Arc<VectorIndex>>>,
}

impl NotebookScope {
    #[inline]
    pub fn new<P: AsRef<Path>>(root: P, embeddings: Arc<EmbeddingService>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            embeddings,
            indices: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn embeddings(&self) -> &Arc<EmbeddingService> {
        &self.embeddings
    }

    fn user_dir(&self, user_id: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join(USERS_DIR)
            .join(encode_component("user id", user_id)?))
    }

    /// Directory holding everything stored for a notebook
    #[inline]
    pub fn notebook_dir(&self, user_id: &str, notebook_id: &str) -> Result<PathBuf> {
        Ok(self
            .user_dir(user_id)?
            .join(NOTEBOOKS_DIR)
            .join(encode_component("notebook id", notebook_id)?))
    }

    /// Location of a notebook's vector index
    #[inline]
    pub fn storage_location(&self, user_id: &str, notebook_id: &str) -> Result<PathBuf> {
        Ok(self.notebook_dir(user_id, notebook_id)?.join(INDEX_DIR))
    }

    /// The notebook's index, opening (and creating) it on first use
    #[inline]
    pub async fn open_index(&self, user_id: &str, notebook_id: &str) -> Result<Arc<VectorIndex>> {
        let key = NotebookKey::new(user_id, notebook_id);
        let location = self.storage_location(user_id, notebook_id)?;

        let mut indices = self.indices.lock().await;
        if let Some(index) = indices.get(&key) {
            return Ok(Arc::clone(index));
        }

        let index = Arc::new(VectorIndex::open(&location, Arc::clone(&self.embeddings)).await?);
        indices.insert(key, Arc::clone(&index));

        debug!(
            "Attached index for notebook {} of user {}",
            notebook_id, user_id
        );
        Ok(index)
    }

    /// Whether the notebook has an attached index or any storage on disk
    #[inline]
    pub async fn exists(&self, user_id: &str, notebook_id: &str) -> Result<bool> {
        let key = NotebookKey::new(user_id, notebook_id);
        if self.indices.lock().await.contains_key(&key) {
            return Ok(true);
        }
        Ok(tokio::fs::try_exists(self.storage_location(user_id, notebook_id)?).await?)
    }

    /// The notebook's index if it already exists; never creates storage
    #[inline]
    pub async fn existing_index(
        &self,
        user_id: &str,
        notebook_id: &str,
    ) -> Result<Option<Arc<VectorIndex>>> {
        let key = NotebookKey::new(user_id, notebook_id);
        let location = self.storage_location(user_id, notebook_id)?;

        let mut indices = self.indices.lock().await;
        if let Some(index) = indices.get(&key) {
            return Ok(Some(Arc::clone(index)));
        }
        if !tokio::fs::try_exists(&location).await? {
            return Ok(None);
        }

        let index = Arc::new(VectorIndex::open(&location, Arc::clone(&self.embeddings)).await?);
        indices.insert(key, Arc::clone(&index));
        debug!(
            "Attached existing index for notebook {} of user {}",
            notebook_id, user_id
        );
        Ok(Some(index))
    }

    /// Remove every record and file stored for the notebook.
    ///
    /// Returns whether anything existed. A later [`NotebookScope::open_index`]
    /// starts from an empty index.
    #[inline]
    pub async fn destroy_index(&self, user_id: &str, notebook_id: &str) -> Result<bool> {
        let key = NotebookKey::new(user_id, notebook_id);
        let notebook_dir = self.notebook_dir(user_id, notebook_id)?;

        let mut indices = self.indices.lock().await;
        if let Some(index) = indices.remove(&key) {
            index.close().await;
        }

        if !tokio::fs::try_exists(&notebook_dir).await? {
            return Ok(false);
        }

        tokio::fs::remove_dir_all(&notebook_dir).await.map_err(|e| {
            ThinkbookError::Storage(format!(
                "failed to remove notebook storage {}: {e}",
                notebook_dir.display()
            ))
        })?;

        info!("Destroyed notebook {} of user {}", notebook_id, user_id);
        Ok(true)
    }

    /// Notebook ids with storage for `user_id`, sorted
    #[inline]
    pub async fn notebooks(&self, user_id: &str) -> Result<Vec<String>> {
        let dir = self.user_dir(user_id)?.join(NOTEBOOKS_DIR);
        let mut ids: Vec<String> = list_dir_names(&dir)
            .await?
            .iter()
            .filter_map(|name| decode_component(name))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Store the uploaded bytes of a document
    #[inline]
    pub async fn save_raw_file(
        &self,
        user_id: &str,
        notebook_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let dir = self
            .notebook_dir(user_id, notebook_id)?
            .join(RAW_FILES_DIR);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(encode_component("file name", filename)?);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Store the text extracted from a document
    #[inline]
    pub async fn save_extracted_text(
        &self,
        user_id: &str,
        notebook_id: &str,
        name: &str,
        text: &str,
    ) -> Result<PathBuf> {
        let dir = self
            .notebook_dir(user_id, notebook_id)?
            .join(EXTRACTED_FILES_DIR);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(format!(
            "{}.{EXTRACTED_EXTENSION}",
            encode_component("document name", name)?
        ));
        tokio::fs::write(&path, text).await?;
        Ok(path)
    }

    /// Every extracted document of the notebook, ordered by name
    #[inline]
    pub async fn extracted_texts(
        &self,
        user_id: &str,
        notebook_id: &str,
    ) -> Result<Vec<ExtractedDocument>> {
        let dir = self
            .notebook_dir(user_id, notebook_id)?
            .join(EXTRACTED_FILES_DIR);

        let mut documents = Vec::new();
        for file_name in list_dir_names(&dir).await? {
            let Some(stem) = file_name.strip_suffix(&format!(".{EXTRACTED_EXTENSION}")) else {
                continue;
            };
            let Some(name) = decode_component(stem) else {
                continue;
            };
            let text = tokio::fs::read_to_string(dir.join(&file_name)).await?;
            documents.push(ExtractedDocument { name, text });
        }

        documents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(documents)
    }
}

async fn list_dir_names(dir: &Path) -> Result<Vec<String>> {
    if !tokio::fs::try_exists(dir).await? {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}
