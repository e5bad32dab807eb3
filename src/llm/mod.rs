// Language model collaborator
// Chat message types shared by retrieval, chat and study artifacts

pub mod ollama;

#[cfg(test)]
mod tests;

pub use ollama::OllamaChat;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        })
    }
}

/// One turn of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling settings for a single request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Lazily produced response tokens
pub type TokenStream = Box<dyn Iterator<Item = Result<String>>>;

/// Produces assistant text from a fully formed message sequence.
///
/// Retries and fallbacks are the implementation's business; callers see only
/// the final result or error.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Result<String>;

    fn stream(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Result<TokenStream>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageModelConfig {
    /// Chat model served by Ollama
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LanguageModelConfig {
    #[inline]
    fn default() -> Self {
        Self {
            model: "llama3.1:8b".to_string(),
            temperature: 0.6,
            max_tokens: 2048,
        }
    }
}

impl LanguageModelConfig {
    /// Options used for grounded chat answers
    #[inline]
    pub fn chat_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}
