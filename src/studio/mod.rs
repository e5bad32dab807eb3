// Study artifacts generated from a notebook's documents
// Summaries, quizzes, study guides and podcast scripts, plus their cache


use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{LazyLock, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::llm::{ChatMessage, GenerationOptions, LanguageModel};
use crate::notebook::NotebookKey;
use crate::{Result, ThinkbookError};

/// Words of document text sent for a summary
pub const SUMMARY_WORD_LIMIT: usize = 12_000;
/// Words of document text sent for every other artifact
pub const ARTIFACT_WORD_LIMIT: usize = 10_000;
pub const TRUNCATION_MARKER: &str = "[... document truncated for summarization ...]";

pub const DEFAULT_QUIZ_QUESTIONS: usize = 5;
pub const DEFAULT_PODCAST_EXCHANGES: usize = 12;

pub const PODCAST_HOST: &str = "Alex";
pub const PODCAST_GUEST: &str = "Dr. Sam";

static JSON_ARRAY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[.*\]").expect("valid regex"));

static SCRIPT_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(dr\.?\s*sam|alex)\s*:\s*(.*)$").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryMode {
    /// A handful of sentences
    Brief,
    /// A structured, sectioned overview
    Descriptive,
}

/// Structured cache key: the artifact kind together with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactKey {
    Summary { mode: SummaryMode },
    Quiz { num_questions: usize },
    StudyGuide,
    PodcastScript { num_exchanges: usize },
}

impl fmt::Display for ArtifactKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Summary {
                mode: SummaryMode::Brief,
            } => f.write_str("summary"),
            Self::Summary {
                mode: SummaryMode::Descriptive,
            } => f.write_str("descriptive summary"),
            Self::Quiz { num_questions } => write!(f, "quiz ({num_questions} questions)"),
            Self::StudyGuide => f.write_str("study guide"),
            Self::PodcastScript { num_exchanges } => {
                write!(f, "podcast script ({num_exchanges} exchanges)")
            }
        }
    }
}

impl FromStr for ArtifactKey {
    type Err = ThinkbookError;

    /// Parse the CLI names `summary`, `descriptive`, `quiz`, `study-guide`
    /// and `podcast` with default parameters
    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "summary" | "brief" => Ok(Self::Summary {
                mode: SummaryMode::Brief,
            }),
            "descriptive" => Ok(Self::Summary {
                mode: SummaryMode::Descriptive,
            }),
            "quiz" => Ok(Self::Quiz {
                num_questions: DEFAULT_QUIZ_QUESTIONS,
            }),
            "study-guide" | "study_guide" => Ok(Self::StudyGuide),
            "podcast" => Ok(Self::PodcastScript {
                num_exchanges: DEFAULT_PODCAST_EXCHANGES,
            }),
            other => Err(ThinkbookError::Config(format!(
                "unknown artifact kind: {other}"
            ))),
        }
    }
}

impl ArtifactKey {
    /// Messages asking the model for this artifact over `document`
    #[inline]
    pub fn prompt(&self, document: &str) -> Vec<ChatMessage> {
        match self {
            Self::Summary { mode } => vec![
                ChatMessage::system(summary_instruction(*mode)),
                ChatMessage::user(format!(
                    "Document:\n\n{}",
                    truncate_words(document, SUMMARY_WORD_LIMIT, Some(TRUNCATION_MARKER))
                )),
            ],
            Self::Quiz { num_questions } => vec![
                ChatMessage::system(quiz_instruction(*num_questions)),
                ChatMessage::user(format!(
                    "Document:\n\n{}",
                    truncate_words(document, ARTIFACT_WORD_LIMIT, None)
                )),
            ],
            Self::StudyGuide => vec![
                ChatMessage::system(STUDY_GUIDE_INSTRUCTION),
                ChatMessage::user(format!(
                    "Document:\n\n{}",
                    truncate_words(document, ARTIFACT_WORD_LIMIT, None)
                )),
            ],
            Self::PodcastScript { num_exchanges } => vec![
                ChatMessage::system(podcast_instruction(*num_exchanges)),
                ChatMessage::user(format!(
                    "Create the podcast episode based on this document:\n\n{}",
                    truncate_words(document, ARTIFACT_WORD_LIMIT, None)
                )),
            ],
        }
    }

    /// Sampling settings suited to this artifact
    #[inline]
    pub fn options(&self) -> GenerationOptions {
        match self {
            Self::Summary { .. } => GenerationOptions {
                temperature: 0.4,
                max_tokens: 2048,
            },
            Self::Quiz { .. } => GenerationOptions {
                temperature: 0.4,
                max_tokens: 3000,
            },
            Self::StudyGuide => GenerationOptions {
                temperature: 0.5,
                max_tokens: 3000,
            },
            Self::PodcastScript { .. } => GenerationOptions {
                temperature: 0.88,
                max_tokens: 4096,
            },
        }
    }

    /// Turn a raw model response into the artifact
    #[inline]
    pub fn parse(&self, response: &str) -> Artifact {
        match self {
            Self::Summary { .. } => Artifact::Summary(response.trim().to_string()),
            Self::Quiz { .. } => Artifact::Quiz(parse_quiz(response)),
            Self::StudyGuide => Artifact::StudyGuide(response.trim().to_string()),
            Self::PodcastScript { .. } => Artifact::PodcastScript(parse_podcast_script(response)),
        }
    }
}

/// A generated study artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Artifact {
    Summary(String),
    Quiz(Vec<QuizQuestion>),
    StudyGuide(String),
    PodcastScript(Vec<ScriptLine>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    /// Option letter to option text
    pub options: BTreeMap<String, String>,
    /// Letter of the correct option
    pub answer: String,
    #[serde(default)]
    pub explanation: String,
}

impl QuizQuestion {
    /// Whether `answer` names the correct option, ignoring case and padding
    #[inline]
    pub fn check_answer(&self, answer: &str) -> bool {
        answer.trim().eq_ignore_ascii_case(self.answer.trim())
    }

    /// Question shown when a quiz response cannot be parsed
    #[inline]
    pub fn regenerate_placeholder() -> Self {
        Self {
            question: "Could not parse quiz. Please try regenerating.".to_string(),
            options: [("A", "Regenerate"), ("B", "-"), ("C", "-"), ("D", "-")]
                .into_iter()
                .map(|(letter, text)| (letter.to_string(), text.to_string()))
                .collect(),
            answer: "A".to_string(),
            explanation: "Quiz generation encountered a parsing error. Try again.".to_string(),
        }
    }
}

/// One spoken line of a podcast script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptLine {
    pub speaker: String,
    pub text: String,
}

/// Generate an artifact with `model`. Blocks until the model answers.
#[inline]
pub fn generate_artifact(
    model: &dyn LanguageModel,
    key: &ArtifactKey,
    document: &str,
) -> Result<Artifact> {
    if document.trim().is_empty() {
        return Err(ThinkbookError::Extraction(
            "no document text available for this notebook".to_string(),
        ));
    }

    debug!("Generating {}", key);
    let response = model.complete(&key.prompt(document), &key.options())?;
    Ok(key.parse(&response))
}

/// Keep at most `limit` whitespace-separated words of `text`.
///
/// Text within the limit is returned unchanged; longer text is re-joined with
/// single spaces and followed by `marker` when one is given.
#[inline]
pub fn truncate_words(text: &str, limit: usize, marker: Option<&str>) -> String {
    let mut words = text.split_whitespace();
    let kept: Vec<&str> = words.by_ref().take(limit).collect();
    if words.next().is_none() {
        return text.to_string();
    }

    let truncated = kept.join(" ");
    match marker {
        Some(marker) => format!("{truncated}\n\n{marker}"),
        None => truncated,
    }
}

/// Questions from the outermost JSON array in a model response
#[inline]
pub fn parse_quiz(response: &str) -> Vec<QuizQuestion> {
    let candidate = match JSON_ARRAY_REGEX.find(response) {
        Ok(Some(found)) => found.as_str(),
        _ => response,
    };

    match serde_json::from_str::<Vec<QuizQuestion>>(candidate) {
        Ok(questions) if !questions.is_empty() => questions,
        Ok(_) => vec![QuizQuestion::regenerate_placeholder()],
        Err(e) => {
            warn!("Failed to parse quiz response: {}", e);
            vec![QuizQuestion::regenerate_placeholder()]
        }
    }
}

/// Lines spoken by the host or guest; everything else is dropped
#[inline]
pub fn parse_podcast_script(script: &str) -> Vec<ScriptLine> {
    script
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let captures = SCRIPT_LINE_REGEX.captures(line).ok()??;
            let speaker = captures.get(1)?.as_str();
            let text = captures.get(2)?.as_str().trim();
            if text.is_empty() {
                return None;
            }
            let speaker = if speaker.eq_ignore_ascii_case("alex") {
                PODCAST_HOST
            } else {
                PODCAST_GUEST
            };
            Some(ScriptLine {
                speaker: speaker.to_string(),
                text: text.to_string(),
            })
        })
        .collect()
}

/// Generated artifacts per notebook, replaced whenever the notebook changes
#[derive(Debug, Default)]
pub struct ArtifactCache {
    entries: RwLock<HashMap<NotebookKey, HashMap<ArtifactKey, Artifact>>>,
}

impl ArtifactCache {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn lookup(&self, notebook: &NotebookKey, key: &ArtifactKey) -> Option<Artifact> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(notebook)
            .and_then(|artifacts| artifacts.get(key))
            .cloned()
    }

    #[inline]
    pub fn insert(&self, notebook: &NotebookKey, key: ArtifactKey, artifact: Artifact) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(notebook.clone())
            .or_default()
            .insert(key, artifact);
    }

    /// Drop every artifact of `notebook`, returning how many were cached
    #[inline]
    pub fn invalidate(&self, notebook: &NotebookKey) -> usize {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(notebook)
            .map_or(0, |artifacts| artifacts.len())
    }
}

fn summary_instruction(mode: SummaryMode) -> &'static str {
    match mode {
        SummaryMode::Brief => {
            "You are an expert summarizer. Read the document below and summarize it in \
             4-6 sentences, covering its main topic, key points and conclusion. Be direct \
             and clear."
        }
        SummaryMode::Descriptive => {
            "You are an expert analyst. Read the document below and write a detailed, \
             structured summary with these sections:\n\
             - **Overview**: what the document is about\n\
             - **Key Themes**: the main topics covered\n\
             - **Important Details**: critical facts, data and arguments\n\
             - **Conclusions**: the key takeaways\n\
             Use markdown formatting and be thorough."
        }
    }
}

fn quiz_instruction(num_questions: usize) -> String {
    format!(
        "You are a quiz master. Using only the document content, write exactly {num_questions} \
multiple-choice questions that test real comprehension.

Respond with a raw JSON array and nothing else: no markdown fences, no preamble.
Each element has this shape:
{{
  \"question\": \"Question text?\",
  \"options\": {{\"A\": \"...\", \"B\": \"...\", \"C\": \"...\", \"D\": \"...\"}},
  \"answer\": \"A\",
  \"explanation\": \"Why A is correct.\"
}}

Rules:
- Base every question strictly on the document
- Make wrong options plausible but clearly wrong
- Mix easy, medium and hard questions
- Keep wording clear and unambiguous"
    )
}

const STUDY_GUIDE_INSTRUCTION: &str = "You are an expert educator. Write a comprehensive study \
guide for the document below, in markdown, with these sections:

## Study Guide
### Key Concepts
The 5-8 most important concepts, each explained in 2-3 sentences.
### Definitions & Terminology
Important terms and their definitions.
### Key Facts & Data Points
Bullet points of crucial facts, figures and data.
### Relationships & Connections
How the main concepts relate to each other.
### Flashcards
8-10 flashcards in exactly this format:
**Q:** Question
**A:** Answer
---
### Summary
A 3-4 sentence summary of the most important takeaways.";

fn podcast_instruction(num_exchanges: usize) -> String {
    format!(
        "You are a podcast scriptwriter. Write a natural, engaging conversation between two \
hosts about the document below.

SPEAKERS:
- {PODCAST_HOST}: curious, enthusiastic host who asks the questions a listener would ask, \
reacts naturally and opens and closes the show.
- {PODCAST_GUEST}: warm, authoritative expert who explains clearly with real-world analogies.

FORMAT: output only lines of the form
{PODCAST_HOST}: <dialogue>
{PODCAST_GUEST}: <dialogue>

STRUCTURE:
1. {PODCAST_HOST} welcomes listeners to the ThinkBook Podcast and introduces {PODCAST_GUEST}
2. {PODCAST_GUEST} greets the listeners and says why the topic excites them
3. They work through the content, {PODCAST_HOST} asking and {PODCAST_GUEST} explaining
4. {PODCAST_HOST} closes with 2 or 3 key takeaways and says goodbye

RULES:
- At least {num_exchanges} back-and-forth exchanges after the introduction
- No stage directions, brackets, asterisks or music cues
- Every line starts with exactly \"{PODCAST_HOST}:\" or \"{PODCAST_GUEST}:\"
- Sound like people talking, with contractions and natural reactions
- Speakers never say their own name"
    )
}
