
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Lines};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ChatMessage, GenerationOptions, LanguageModel, TokenStream};
use crate::ThinkbookError;
use crate::config::OllamaConfig;
use crate::http::{DEFAULT_RETRY_ATTEMPTS, build_agent, request_with_retry};

const CHAT_TIMEOUT_SECONDS: u64 = 300;

/// Chat completion against an Ollama server's `/api/chat`
#[derive(Debug, Clone)]
pub struct OllamaChat {
    base_url: Url,
    model: String,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: RequestOptions,
}

#[derive(Debug, Serialize)]
struct RequestOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

impl OllamaChat {
    /// Client for `model` on the server described by `config`
    #[inline]
    pub fn new(config: &OllamaConfig, model: &str) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: model.to_string(),
            agent: build_agent(Duration::from_secs(CHAT_TIMEOUT_SECONDS)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
        stream: bool,
    ) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream,
            options: RequestOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };
        serde_json::to_string(&request).context("Failed to serialize chat request")
    }

    fn chat_url(&self) -> Result<Url> {
        self.base_url
            .join("/api/chat")
            .context("Failed to build chat URL")
    }

    fn complete_inner(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Result<String> {
        let url = self.chat_url()?;
        let body = self.request_body(messages, options, false)?;

        debug!(
            "Requesting completion from {} for {} messages",
            self.model,
            messages.len()
        );

        let response_text = request_with_retry(self.base_url.as_str(), self.retry_attempts, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to request chat completion")?;

        let chunk: ChatChunk =
            serde_json::from_str(&response_text).context("Failed to parse chat response")?;
        if let Some(error) = chunk.error {
            return Err(anyhow::anyhow!("Ollama reported an error: {error}"));
        }

        Ok(chunk
            .message
            .map(|m| m.content.trim().to_string())
            .unwrap_or_default())
    }

    fn stream_inner(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Result<TokenStream> {
        let url = self.chat_url()?;
        let body = self.request_body(messages, options, true)?;

        let response = request_with_retry(self.base_url.as_str(), self.retry_attempts, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&body)
        })
        .context("Failed to start chat stream")?;

        let reader = BufReader::new(response.into_body().into_reader());
        Ok(Box::new(NdjsonTokens::new(reader)))
    }
}

impl LanguageModel for OllamaChat {
    #[inline]
    fn complete(&self, messages: &[ChatMessage], options: &GenerationOptions) -> crate::Result<String> {
        self.complete_inner(messages, options)
            .map_err(|e| ThinkbookError::LanguageModel(format!("{e:#}")))
    }

    #[inline]
    fn stream(&self, messages: &[ChatMessage], options: &GenerationOptions) -> crate::Result<TokenStream> {
        self.stream_inner(messages, options)
            .map_err(|e| ThinkbookError::LanguageModel(format!("{e:#}")))
    }
}

/// Tokens of a newline-delimited JSON chat stream
pub struct NdjsonTokens<R> {
    lines: Lines<R>,
    finished: bool,
}

impl<R: BufRead> NdjsonTokens<R> {
    #[inline]
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            finished: false,
        }
    }
}

impl<R: BufRead> Iterator for NdjsonTokens<R> {
    type Item = crate::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(ThinkbookError::LanguageModel(format!(
                        "failed to read chat stream: {e}"
                    ))));
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let chunk: ChatChunk = match serde_json::from_str(&line) {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(ThinkbookError::LanguageModel(format!(
                        "malformed chat stream line: {e}"
                    ))));
                }
            };

            if let Some(error) = chunk.error {
                self.finished = true;
                return Some(Err(ThinkbookError::LanguageModel(error)));
            }
            self.finished = chunk.done;

            let content = chunk.message.map(|m| m.content).unwrap_or_default();
            if !content.is_empty() {
                return Some(Ok(content));
            }
        }
        None
    }
}
