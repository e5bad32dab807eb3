
use scraper::{Html, Selector};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::http::{DEFAULT_RETRY_ATTEMPTS, build_agent, request_with_retry};
use crate::{Result, ThinkbookError};

const URL_TIMEOUT_SECONDS: u64 = 15;
const USER_AGENT: &str = "Mozilla/5.0 (compatible; thinkbook)";
const HIDDEN_ELEMENTS: &str = "script, style, nav, footer, header";

/// Kinds of document the assistant can ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    Pdf,
    Pptx,
    Txt,
    Url,
}

impl SourceType {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Pptx => "pptx",
            Self::Txt => "txt",
            Self::Url => "url",
        }
    }

    /// Source type implied by a file's extension
    #[inline]
    pub fn from_path(path: &Path) -> Result<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| {
                ThinkbookError::UnsupportedFormat(format!(
                    "{} has no file extension",
                    path.display()
                ))
            })?
            .parse()
    }
}

impl fmt::Display for SourceType {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = ThinkbookError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "pptx" => Ok(Self::Pptx),
            "txt" => Ok(Self::Txt),
            "url" => Ok(Self::Url),
            other => Err(ThinkbookError::UnsupportedFormat(format!(
                "unsupported source type: {other}"
            ))),
        }
    }
}

/// Payload handed to an extractor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceData {
    Bytes(Vec<u8>),
    Url(String),
}

/// Produces raw UTF-8 text from a document.
///
/// An empty string means nothing could be extracted; callers decide how much
/// text is enough.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, source_type: SourceType, data: &SourceData) -> Result<String>;
}

/// Built-in extractor for plain text and web pages.
///
/// PDF and PPTX documents need an external extractor.
#[derive(Debug, Clone)]
pub struct BasicExtractor {
    agent: ureq::Agent,
    retry_attempts: u32,
}

impl Default for BasicExtractor {
    #[inline]
    fn default() -> Self {
        Self {
            agent: build_agent(Duration::from_secs(URL_TIMEOUT_SECONDS)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }
}

impl BasicExtractor {
    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    fn fetch_url(&self, raw_url: &str) -> Result<String> {
        let url = Url::parse(raw_url.trim())
            .map_err(|e| ThinkbookError::Extraction(format!("invalid URL {raw_url:?}: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ThinkbookError::Extraction(format!(
                "unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        debug!("Fetching {}", url);

        let html = request_with_retry(url.as_str(), self.retry_attempts, || {
            self.agent
                .get(url.as_str())
                .header("User-Agent", USER_AGENT)
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|e| ThinkbookError::Extraction(format!("failed to fetch {url}: {e:#}")))?;

        html_to_text(&html)
    }
}

impl TextExtractor for BasicExtractor {
    #[inline]
    fn extract(&self, source_type: SourceType, data: &SourceData) -> Result<String> {
        match (source_type, data) {
            (SourceType::Txt, SourceData::Bytes(bytes)) => Ok(decode_text(bytes)),
            (SourceType::Url, SourceData::Url(url)) => self.fetch_url(url),
            (SourceType::Url, SourceData::Bytes(bytes)) => self.fetch_url(&decode_text(bytes)),
            (SourceType::Txt, SourceData::Url(_)) => Err(ThinkbookError::Extraction(
                "text sources must be provided as bytes".to_string(),
            )),
            (SourceType::Pdf | SourceType::Pptx, _) => Err(ThinkbookError::UnsupportedFormat(
                format!("{source_type} documents require an external extractor"),
            )),
        }
    }
}

/// UTF-8 text, falling back to Latin-1 for invalid input, trimmed
#[inline]
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.trim().to_string(),
        Err(_) => bytes
            .iter()
            .map(|&b| char::from(b))
            .collect::<String>()
            .trim()
            .to_string(),
    }
}

/// Visible text of an HTML page, one trimmed non-empty line per text run.
///
/// Scripts, styles and page chrome (`nav`, `header`, `footer`) are dropped.
#[inline]
pub fn html_to_text(html: &str) -> Result<String> {
    let hidden = Selector::parse(HIDDEN_ELEMENTS)
        .map_err(|e| ThinkbookError::Extraction(format!("invalid selector: {e}")))?;

    let mut document = Html::parse_document(html);
    let hidden_ids: Vec<_> = document.select(&hidden).map(|element| element.id()).collect();
    for node_id in hidden_ids {
        if let Some(mut node) = document.tree.get_mut(node_id) {
            node.detach();
        }
    }

    let lines: Vec<&str> = document
        .root_element()
        .text()
        .flat_map(str::lines)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    Ok(lines.join("\n"))
}

/// Reject extracted text shorter than `min_chars` characters once trimmed
#[inline]
pub fn ensure_min_text(text: &str, min_chars: usize) -> Result<()> {
    let length = text.trim().chars().count();
    if length < min_chars {
        return Err(ThinkbookError::Extraction(format!(
            "could not extract enough text ({length} characters, need at least {min_chars})"
        )));
    }
    Ok(())
}
