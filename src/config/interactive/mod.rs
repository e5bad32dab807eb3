#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::Path;

use super::{Config, ConfigError, OllamaConfig};
use crate::http::build_agent;

#[inline]
pub fn run_interactive_config() -> Result<()> {
    eprintln!("{}", style("🔧 ThinkBook Configuration Setup").bold().cyan());
    eprintln!();

    let config_dir = Config::config_dir().context("Failed to resolve config directory")?;
    let mut config = load_existing_config(&config_dir)?;

    eprintln!("{}", style("Embedding Server").bold().yellow());
    eprintln!("Configure the Ollama instance that embeds document chunks.");
    eprintln!();

    configure_ollama(&mut config.ollama)?;

    eprintln!();
    eprintln!("{}", style("Chunking").bold().yellow());
    configure_chunking(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Chat Model").bold().yellow());
    config.language_model.model = Input::new()
        .with_prompt("Chat model")
        .default(config.language_model.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but make sure Ollama is running before ingesting documents.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());

        let config_path = config
            .config_file_path()
            .context("Failed to get config file path")?;
        eprintln!(
            "Configuration saved to: {}",
            style(config_path.display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding Settings:").bold().yellow());
    eprintln!("  Host: {}", style(&config.ollama.host).cyan());
    eprintln!("  Port: {}", style(config.ollama.port).cyan());
    eprintln!("  Model: {}", style(&config.ollama.model).cyan());
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    eprintln!(
        "  Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Chunking:").bold().yellow());
    eprintln!(
        "  Chunk Size: {} words",
        style(config.chunking.chunk_size).cyan()
    );
    eprintln!("  Overlap: {} words", style(config.chunking.overlap).cyan());

    eprintln!();
    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!("  Search Top K: {}", style(config.retrieval.top_k).cyan());
    eprintln!(
        "  Chat Context Top K: {}",
        style(config.retrieval.context_top_k).cyan()
    );
    eprintln!(
        "  History Turns: {}",
        style(config.retrieval.history_turns).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Chat Model:").bold().yellow());
    eprintln!("  Model: {}", style(&config.language_model.model).cyan());
    eprintln!(
        "  Temperature: {}",
        style(config.language_model.temperature).cyan()
    );

    let config_path = config
        .config_file_path()
        .context("Failed to get config file path")?;
    eprintln!();
    eprintln!("Config file: {}", style(config_path.display()).dim());

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    Config::load_from(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No valid configuration found. Using defaults.").yellow()
            );
            Ok(Config {
                base_dir: Some(config_dir.to_path_buf()),
                ..Config::default()
            })
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            temp_config.validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(ollama.embedding_dimension)
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding generation")
        .default(ollama.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_embedding_dimension(dimension)?;
    ollama.set_batch_size(batch_size)?;

    Ok(())
}

fn configure_chunking(config: &mut Config) -> Result<()> {
    let chunk_size: usize = Input::new()
        .with_prompt("Words per chunk")
        .default(config.chunking.chunk_size)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if *input == 0 {
                Err("Chunk size must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let overlap: usize = Input::new()
        .with_prompt("Words of overlap between chunks")
        .default(config.chunking.overlap.min(chunk_size.saturating_sub(1)))
        .validate_with(|input: &usize| -> Result<(), String> {
            if *input >= chunk_size {
                Err(format!("Overlap must be smaller than {}", chunk_size))
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    config.chunking.chunk_size = chunk_size;
    config.chunking.overlap = overlap;
    Ok(())
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent = build_agent(std::time::Duration::from_secs(5));

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) => (400..500).contains(&code),
        Err(_) => false,
    }
}
