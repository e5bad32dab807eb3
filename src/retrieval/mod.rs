// Retrieval assembly
// Turns nearest-neighbour results into attributed context for the chat model

#[cfg(test)]
mod tests;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;
use crate::database::{RetrievedChunk, VectorIndex};
use crate::llm::ChatMessage;

/// Instruction placed first in every grounded conversation
pub const SYSTEM_PROMPT: &str = "You are ThinkBook AI, an assistant that answers questions \
using the documents the user has uploaded.

Rules:
- Base every answer on the provided context chunks.
- When the context does not contain the answer, say so plainly.
- Be conversational, clear and helpful.
- Earlier turns of the conversation may be referenced.
- Use markdown formatting where it helps.
- Be thorough but concise.";

/// Context used when the index returns nothing
pub const NO_CONTEXT_PLACEHOLDER: &str = "No relevant context found.";

/// Separator placed between context blocks
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Results returned by a plain search
    pub top_k: usize,
    /// Results placed into a chat prompt
    pub context_top_k: usize,
    /// Most recent history messages carried into a chat prompt
    pub history_turns: usize,
    /// Extracted documents shorter than this are rejected at ingestion
    pub min_extracted_chars: usize,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: 5,
            context_top_k: 6,
            history_turns: 10,
            min_extracted_chars: 50,
        }
    }
}

/// Label a result as `[Source i: <source>]` followed by its text
#[inline]
pub fn format_block(rank: usize, chunk: &RetrievedChunk) -> String {
    format!("[Source {}: {}]\n{}", rank, chunk.source(), chunk.text)
}

/// Numbered, separated context blocks in rank order
#[inline]
pub fn format_context(results: &[RetrievedChunk]) -> String {
    if results.is_empty() {
        return NO_CONTEXT_PLACEHOLDER.to_string();
    }

    results
        .iter()
        .enumerate()
        .map(|(i, chunk)| format_block(i + 1, chunk))
        .join(CONTEXT_SEPARATOR)
}

/// Final user message: the retrieved context followed by the question
#[inline]
pub fn user_message(context: &str, query: &str) -> String {
    format!("Context from documents:\n---\n{context}\n---\n\nUser question: {query}")
}

/// Builds the prompt for a grounded chat turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalAssembler {
    system_prompt: String,
    history_turns: usize,
}

impl Default for RetrievalAssembler {
    #[inline]
    fn default() -> Self {
        Self::new(RetrievalConfig::default().history_turns)
    }
}

impl RetrievalAssembler {
    #[inline]
    pub fn new(history_turns: usize) -> Self {
        Self {
            system_prompt: SYSTEM_PROMPT.to_string(),
            history_turns,
        }
    }

    #[inline]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Search `index` for `query` and assemble the chat prompt.
    ///
    /// The index and `history` are only read. Embedding and storage failures
    /// propagate; an empty index yields the placeholder context.
    #[inline]
    pub async fn build_context(
        &self,
        query: &str,
        index: &VectorIndex,
        history: &[ChatMessage],
        top_k: usize,
    ) -> Result<Vec<ChatMessage>> {
        let results = index.search(query, top_k).await?;
        debug!(
            "Assembling prompt from {} retrieved chunks and {} history messages",
            results.len(),
            history.len()
        );
        Ok(self.assemble(query, &results, history))
    }

    /// System instruction, the most recent history, then the grounded question
    #[inline]
    pub fn assemble(
        &self,
        query: &str,
        results: &[RetrievedChunk],
        history: &[ChatMessage],
    ) -> Vec<ChatMessage> {
        let recent = &history[history.len().saturating_sub(self.history_turns)..];

        let mut messages = Vec::with_capacity(recent.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(recent.iter().cloned());
        messages.push(ChatMessage::user(user_message(
            &format_context(results),
            query,
        )));
        messages
    }
}
