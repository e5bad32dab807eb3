use clap::{Parser, Subcommand};
use thinkbook::Result;
use thinkbook::commands::{
    ask_question, delete_notebook, generate_study_artifact, ingest_document, list_notebooks,
    search_notebook, show_status,
};
use thinkbook::config::{run_interactive_config, show_config};
use thinkbook::studio::ArtifactKey;

#[derive(Parser)]
#[command(name = "thinkbook")]
#[command(about = "A notebook assistant that answers questions from your own documents")]
#[command(version)]
struct Cli {
    /// User that owns the notebooks
    #[arg(long, global = true, default_value = "local")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the Ollama connection, chunking and chat model
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Add a document or web page to a notebook
    Ingest {
        notebook: String,
        /// File path, or a URL together with --url
        path: String,
        /// Treat the path as a web page URL
        #[arg(long)]
        url: bool,
        /// Source type (pdf, pptx, txt, url); defaults to the file extension
        #[arg(long = "type")]
        source_type: Option<String>,
    },
    /// Search a notebook for the passages closest to a query
    Search {
        notebook: String,
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Ask a question answered from a notebook's documents
    Ask { notebook: String, question: String },
    /// Generate a study artifact: summary, descriptive, quiz, study-guide or podcast
    Studio {
        notebook: String,
        kind: ArtifactKey,
        /// Number of quiz questions
        #[arg(long)]
        questions: Option<usize>,
        /// Number of podcast exchanges
        #[arg(long)]
        exchanges: Option<usize>,
    },
    /// List the user's notebooks
    List,
    /// Show what a notebook holds
    Status { notebook: String },
    /// Delete a notebook and everything stored for it
    Delete {
        notebook: String,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
}

fn sized_artifact(
    kind: ArtifactKey,
    questions: Option<usize>,
    exchanges: Option<usize>,
) -> ArtifactKey {
    match kind {
        ArtifactKey::Quiz { num_questions } => ArtifactKey::Quiz {
            num_questions: questions.unwrap_or(num_questions),
        },
        ArtifactKey::PodcastScript { num_exchanges } => ArtifactKey::PodcastScript {
            num_exchanges: exchanges.unwrap_or(num_exchanges),
        },
        other => other,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let user = cli.user.as_str();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Ingest {
            notebook,
            path,
            url,
            source_type,
        } => {
            ingest_document(user, &notebook, &path, url, source_type.as_deref()).await?;
        }
        Commands::Search {
            notebook,
            query,
            top_k,
        } => {
            search_notebook(user, &notebook, &query, top_k).await?;
        }
        Commands::Ask { notebook, question } => {
            ask_question(user, &notebook, &question).await?;
        }
        Commands::Studio {
            notebook,
            kind,
            questions,
            exchanges,
        } => {
            let key = sized_artifact(kind, questions, exchanges);
            generate_study_artifact(user, &notebook, key).await?;
        }
        Commands::List => {
            list_notebooks(user).await?;
        }
        Commands::Status { notebook } => {
            show_status(user, &notebook).await?;
        }
        Commands::Delete { notebook, yes } => {
            delete_notebook(user, &notebook, yes).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use thinkbook::studio::SummaryMode;

    #[test]
    fn default_user() {
        let cli = Cli::try_parse_from(["thinkbook", "list"]).expect("should parse");
        assert_eq!(cli.user, "local");
        assert!(matches!(cli.command, Commands::List));
    }

    #[test]
    fn global_user_flag() {
        let cli = Cli::try_parse_from(["thinkbook", "status", "biology", "--user", "alice"])
            .expect("should parse");
        assert_eq!(cli.user, "alice");
        match cli.command {
            Commands::Status { notebook } => assert_eq!(notebook, "biology"),
            _ => panic!("expected status command"),
        }
    }

    #[test]
    fn ingest_file_with_type() {
        let cli = Cli::try_parse_from([
            "thinkbook",
            "ingest",
            "biology",
            "notes.dat",
            "--type",
            "txt",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Ingest {
                notebook,
                path,
                url,
                source_type,
            } => {
                assert_eq!(notebook, "biology");
                assert_eq!(path, "notes.dat");
                assert!(!url);
                assert_eq!(source_type.as_deref(), Some("txt"));
            }
            _ => panic!("expected ingest command"),
        }
    }

    #[test]
    fn ingest_url() {
        let cli = Cli::try_parse_from([
            "thinkbook",
            "ingest",
            "biology",
            "https://example.com/cells",
            "--url",
        ])
        .expect("should parse");

        assert!(matches!(cli.command, Commands::Ingest { url: true, .. }));
    }

    #[test]
    fn search_with_top_k() {
        let cli = Cli::try_parse_from(["thinkbook", "search", "biology", "mitosis", "--top-k", "3"])
            .expect("should parse");

        match cli.command {
            Commands::Search { query, top_k, .. } => {
                assert_eq!(query, "mitosis");
                assert_eq!(top_k, Some(3));
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn studio_kinds() {
        let cli = Cli::try_parse_from(["thinkbook", "studio", "biology", "descriptive"])
            .expect("should parse");
        match cli.command {
            Commands::Studio { kind, .. } => assert_eq!(
                kind,
                ArtifactKey::Summary {
                    mode: SummaryMode::Descriptive
                }
            ),
            _ => panic!("expected studio command"),
        }

        let cli = Cli::try_parse_from(["thinkbook", "studio", "biology", "flashcards"]);
        assert!(cli.is_err());
    }

    #[test]
    fn studio_sizes_override_defaults() {
        let cli = Cli::try_parse_from([
            "thinkbook",
            "studio",
            "biology",
            "quiz",
            "--questions",
            "3",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Studio {
                kind,
                questions,
                exchanges,
                ..
            } => assert_eq!(
                sized_artifact(kind, questions, exchanges),
                ArtifactKey::Quiz { num_questions: 3 }
            ),
            _ => panic!("expected studio command"),
        }

        assert_eq!(
            sized_artifact(ArtifactKey::StudyGuide, Some(3), Some(4)),
            ArtifactKey::StudyGuide
        );
    }

    #[test]
    fn delete_confirmation_flag() {
        let cli = Cli::try_parse_from(["thinkbook", "delete", "biology", "-y"])
            .expect("should parse");
        assert!(matches!(cli.command, Commands::Delete { yes: true, .. }));
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["thinkbook", "config", "--show"]).expect("should parse");
        assert!(matches!(cli.command, Commands::Config { show: true }));
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["thinkbook", "invalid"]);
        match cli {
            Err(err) => assert_eq!(err.kind(), ErrorKind::InvalidSubcommand),
            Ok(_) => panic!("invalid subcommand should not parse"),
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["thinkbook", "--help"]);
        match cli {
            Err(err) => assert_eq!(err.kind(), ErrorKind::DisplayHelp),
            Ok(_) => panic!("help should short-circuit parsing"),
        }
    }
}
