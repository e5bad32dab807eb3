use anyhow::{Context, Result};
use console::style;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

use crate::config::Config;
use crate::extraction::SourceType;
use crate::pipeline::{NotebookPipeline, SourceDocument};
use crate::studio::{Artifact, ArtifactKey};

fn load_pipeline() -> Result<NotebookPipeline> {
    let config = Config::load().context("Failed to load configuration")?;
    NotebookPipeline::from_config(&config).context("Failed to initialize notebook storage")
}

fn spinner(message: String) -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new_spinner().with_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Add a file or web page to a notebook
#[inline]
pub async fn ingest_document(
    user_id: &str,
    notebook_id: &str,
    target: &str,
    is_url: bool,
    source_type: Option<&str>,
) -> Result<()> {
    let document = if is_url {
        SourceDocument::from_url(target)
    } else {
        let path = Path::new(target);
        let source_type = match source_type {
            Some(explicit) => explicit.parse::<SourceType>()?,
            None => SourceType::from_path(path)?,
        };
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map_or_else(|| target.to_string(), |name| name.to_string_lossy().into_owned());
        SourceDocument::from_bytes(name, source_type, bytes)
    };

    let pipeline = load_pipeline()?;
    info!("Ingesting {} into notebook {}", document.name, notebook_id);

    let bar = spinner(format!("Ingesting {}", document.name));
    let result = pipeline.ingest(user_id, notebook_id, document).await;
    bar.finish_and_clear();

    match result {
        Ok(report) => {
            println!(
                "{} {} added to {}",
                style("✓").green(),
                style(&report.source).bold(),
                style(notebook_id).cyan()
            );
            println!("  Chunks: {}", report.chunks);
            println!("  Characters: {}", report.characters);
            Ok(())
        }
        Err(e) => {
            error!("Ingestion failed: {}", e);
            Err(e).context("Failed to ingest document")
        }
    }
}

/// Print the chunks nearest to `query`
#[inline]
pub async fn search_notebook(
    user_id: &str,
    notebook_id: &str,
    query: &str,
    top_k: Option<usize>,
) -> Result<()> {
    let pipeline = load_pipeline()?;
    let results = pipeline
        .search(user_id, notebook_id, query, top_k)
        .await
        .context("Search failed")?;

    if results.is_empty() {
        println!("No results. Add documents with 'thinkbook ingest {notebook_id} <path>'.");
        return Ok(());
    }

    for (rank, result) in results.iter().enumerate() {
        println!(
            "{} {} {}",
            style(format!("{}.", rank + 1)).bold(),
            style(result.source()).cyan(),
            style(format!("(distance {:.4})", result.distance)).dim()
        );
        println!("   {}", result.text);
        println!();
    }

    Ok(())
}

/// Answer a question from the notebook's documents and remember the exchange
#[inline]
pub async fn ask_question(user_id: &str, notebook_id: &str, question: &str) -> Result<()> {
    let pipeline = load_pipeline()?;
    let history = pipeline
        .history(user_id, notebook_id)
        .await
        .context("Failed to read chat history")?;

    let bar = spinner("Thinking".to_string());
    let stream = pipeline
        .chat_stream(user_id, notebook_id, question, &history)
        .await;
    let mut stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            bar.finish_and_clear();
            return Err(e).context("Failed to answer question");
        }
    };

    let mut answer = String::new();
    let mut stdout = std::io::stdout();
    while let Some(token) = stream.next_token().await {
        if !bar.is_finished() {
            bar.finish_and_clear();
        }
        let token = token.context("Failed to answer question")?;
        print!("{token}");
        stdout.flush().context("Failed to write answer")?;
        answer.push_str(&token);
    }
    bar.finish_and_clear();
    println!();

    pipeline
        .record_exchange(user_id, notebook_id, question, answer.trim())
        .await
        .context("Failed to save chat history")?;
    Ok(())
}

/// Generate and print a study artifact for a notebook
#[inline]
pub async fn generate_study_artifact(
    user_id: &str,
    notebook_id: &str,
    key: ArtifactKey,
) -> Result<()> {
    let pipeline = load_pipeline()?;

    let bar = spinner(format!("Generating {key}"));
    let artifact = pipeline.generate_artifact(user_id, notebook_id, key).await;
    bar.finish_and_clear();

    print_artifact(&artifact.with_context(|| format!("Failed to generate {key}"))?);
    Ok(())
}

fn print_artifact(artifact: &Artifact) {
    match artifact {
        Artifact::Summary(text) | Artifact::StudyGuide(text) => println!("{text}"),
        Artifact::Quiz(questions) => {
            for (number, question) in questions.iter().enumerate() {
                println!(
                    "{} {}",
                    style(format!("Q{}.", number + 1)).bold(),
                    question.question
                );
                for (letter, option) in &question.options {
                    println!("   {letter}) {option}");
                }
                println!("   {} {}", style("Answer:").green(), question.answer);
                if !question.explanation.is_empty() {
                    println!("   {}", style(&question.explanation).dim());
                }
                println!();
            }
        }
        Artifact::PodcastScript(lines) => {
            for line in lines {
                println!("{} {}", style(format!("{}:", line.speaker)).bold().cyan(), line.text);
            }
        }
    }
}

/// List the notebooks of a user
#[inline]
pub async fn list_notebooks(user_id: &str) -> Result<()> {
    let pipeline = load_pipeline()?;
    let notebooks = pipeline
        .scope()
        .notebooks(user_id)
        .await
        .context("Failed to list notebooks")?;

    if notebooks.is_empty() {
        println!("No notebooks yet. Use 'thinkbook ingest <notebook> <path>' to create one.");
        return Ok(());
    }

    println!("Notebooks of {} ({} total):", style(user_id).cyan(), notebooks.len());
    for notebook in &notebooks {
        println!("  📓 {notebook}");
    }
    Ok(())
}

/// Show what a notebook holds
#[inline]
pub async fn show_status(user_id: &str, notebook_id: &str) -> Result<()> {
    let pipeline = load_pipeline()?;
    let status = pipeline
        .status(user_id, notebook_id)
        .await
        .context("Failed to read notebook status")?;

    println!("{}", style(format!("📓 {notebook_id}")).bold().cyan());
    if status.ready {
        println!("   Status: {}", style("ready").green());
    } else {
        println!("   Status: {}", style("empty").yellow());
    }
    println!("   Chunks: {}", status.chunks);
    if let Some(dimension) = status.dimension {
        println!("   Dimension: {dimension}");
    }
    if let Some(model) = &status.embedding_model {
        println!("   Embedding Model: {model}");
    }

    if !status.sources.is_empty() {
        println!("   Documents:");
        for source in &status.sources {
            println!("     {} ({} chunks)", source.source, source.chunks);
        }
    }

    Ok(())
}

/// Delete a notebook after confirmation
#[inline]
pub async fn delete_notebook(user_id: &str, notebook_id: &str, assume_yes: bool) -> Result<()> {
    if !assume_yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete notebook '{notebook_id}' with all its documents? This cannot be undone."
            ))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let pipeline = load_pipeline()?;
    let removed = pipeline
        .delete_notebook(user_id, notebook_id)
        .await
        .context("Failed to delete notebook")?;

    if removed {
        println!("{} Deleted notebook {}", style("✓").green(), notebook_id);
    } else {
        println!("Notebook {notebook_id} does not exist.");
    }
    Ok(())
}
