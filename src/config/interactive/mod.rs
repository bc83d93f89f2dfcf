#[cfg(test)]
mod tests;

use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{Config, ConfigError, RemoteEmbeddingConfig};
use crate::context::OverflowStrategy;
use crate::embeddings::RemoteEmbeddingClient;

const STRATEGIES: [OverflowStrategy; 2] = [
    OverflowStrategy::TruncateOld,
    OverflowStrategy::TruncateMiddle,
];

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 RAG Memory Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir)?;

    eprintln!("{}", style("Storage").bold().yellow());
    eprintln!("Memories are encrypted on disk with a key kept beside the database.");
    eprintln!();
    configure_store(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Embeddings").bold().yellow());
    eprintln!("A built-in local embedder is always available as the last fallback.");
    eprintln!();
    configure_remote(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Context Window").bold().yellow());
    eprintln!();
    configure_context(&mut config)?;

    if let Some(remote) = &config.embeddings.remote {
        eprintln!();
        eprintln!("{}", style("Testing remote embeddings...").yellow());
        match test_remote_connection(remote) {
            Ok(dimension) => eprintln!(
                "{}",
                style(format!("✓ Remote endpoint answered with {dimension}-dimensional vectors")).green()
            ),
            Err(e) => {
                eprintln!(
                    "{}",
                    style(format!("⚠ Warning: remote embeddings unavailable: {e}")).yellow()
                );
                eprintln!("You can continue; the local embedder is used until the endpoint works.");
            }
        }
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config: &Config) {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Store Settings:").bold().yellow());
    eprintln!("  Max Embeddings: {}", style(config.store.max_embeddings).cyan());
    if config.store.max_age_days == 0 {
        eprintln!("  Max Age: {}", style("unlimited").cyan());
    } else {
        eprintln!("  Max Age: {} days", style(config.store.max_age_days).cyan());
    }
    eprintln!(
        "  Compress Vectors: {}",
        style(config.store.compress_vectors).cyan()
    );
    eprintln!("  Database: {}", style(config.database_path().display()).cyan());

    eprintln!();
    eprintln!("{}", style("Embedding Settings:").bold().yellow());
    eprintln!(
        "  Local Dimension: {}",
        style(config.embeddings.local_dimension).cyan()
    );
    match &config.embeddings.remote {
        Some(remote) => {
            match remote.endpoint_url() {
                Ok(url) => eprintln!("  Remote Endpoint: {}", style(url).cyan()),
                Err(e) => eprintln!("  Remote Endpoint: {} ({})", style("Invalid").red(), e),
            }
            eprintln!("  Remote Model: {}", style(&remote.model).cyan());
            let key_state = if std::env::var_os(&remote.api_key_env).is_some() {
                style("set").green()
            } else {
                style("not set").red()
            };
            eprintln!("  API Key Variable: {} ({})", style(&remote.api_key_env).cyan(), key_state);
        }
        None => eprintln!("  Remote: {}", style("disabled").dim()),
    }

    eprintln!();
    eprintln!("{}", style("Chunking & Memory:").bold().yellow());
    eprintln!(
        "  Chunk Size: {} (min {}, overlap {})",
        style(config.chunking.max_chunk_size).cyan(),
        config.chunking.min_chunk_size,
        config.chunking.overlap_size
    );
    eprintln!(
        "  Chunk Threshold: {} characters",
        style(config.memory.chunk_threshold).cyan()
    );
    eprintln!(
        "  Search Defaults: limit {}, threshold {}",
        style(config.memory.default_limit).cyan(),
        style(config.memory.default_threshold).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Context Window:").bold().yellow());
    eprintln!(
        "  Max Tokens: {} (reserve {})",
        style(config.context.max_tokens).cyan(),
        config.context.reserve_tokens
    );
    eprintln!("  Strategy: {}", style(config.context.strategy).cyan());

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    if !config_dir.join("config.toml").exists() {
        eprintln!(
            "{}",
            style("No existing configuration found. Using defaults.").yellow()
        );
        return Config::load(config_dir);
    }

    Config::load(config_dir).map_or_else(
        |e| {
            eprintln!(
                "{}",
                style(format!("Existing configuration is invalid ({e:#}). Using defaults.")).yellow()
            );
            Ok(Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            })
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_store(config: &mut Config) -> Result<()> {
    let max_embeddings: usize = Input::new()
        .with_prompt("Maximum number of stored embeddings")
        .default(config.store.max_embeddings)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=1_000_000).contains(input) {
                Ok(())
            } else {
                Err("Must be between 1 and 1000000")
            }
        })
        .interact_text()?;

    let max_age_days: u32 = Input::new()
        .with_prompt("Forget memories older than (days, 0 = never)")
        .default(config.store.max_age_days)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input > 3650 {
                Err("Must be 3650 days or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let compress_vectors = Confirm::new()
        .with_prompt("Store vectors quantized (smaller, slightly less precise)?")
        .default(config.store.compress_vectors)
        .interact()?;

    config.store.set_max_embeddings(max_embeddings)?;
    config.store.set_max_age_days(max_age_days)?;
    config.store.compress_vectors = compress_vectors;

    Ok(())
}

fn configure_remote(config: &mut Config) -> Result<()> {
    let enabled = Confirm::new()
        .with_prompt("Use a remote embedding API?")
        .default(config.embeddings.remote.is_some())
        .interact()?;
    if !enabled {
        config.embeddings.remote = None;
        return Ok(());
    }

    let mut remote = config.embeddings.remote.clone().unwrap_or_default();

    let endpoint: String = Input::new()
        .with_prompt("Embedding endpoint")
        .default(remote.endpoint.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = RemoteEmbeddingConfig {
                endpoint: input.clone(),
                ..RemoteEmbeddingConfig::default()
            };
            temp_config.endpoint_url()?;
            Ok(())
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(remote.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let api_key_env: String = Input::new()
        .with_prompt("Environment variable holding the API key")
        .default(remote.api_key_env.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Variable name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let retry_attempts: u32 = Input::new()
        .with_prompt("Attempts per request")
        .default(remote.retry_attempts)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (1..=10).contains(input) {
                Ok(())
            } else {
                Err("Must be between 1 and 10")
            }
        })
        .interact_text()?;

    remote.set_endpoint(endpoint)?;
    remote.set_model(model)?;
    remote.set_api_key_env(api_key_env)?;
    remote.set_retry_attempts(retry_attempts)?;
    config.embeddings.remote = Some(remote);

    Ok(())
}

fn configure_context(config: &mut Config) -> Result<()> {
    let max_tokens: usize = Input::new()
        .with_prompt("Model context window (tokens)")
        .default(config.context.max_tokens)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if *input == 0 {
                Err("Must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let reserve_tokens: usize = Input::new()
        .with_prompt("Tokens reserved for the reply")
        .default(config.context.reserve_tokens.min(max_tokens.saturating_sub(1)))
        .validate_with(|input: &usize| -> Result<(), String> {
            if *input >= max_tokens {
                Err(format!("Must be less than {max_tokens}"))
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let labels: Vec<String> = STRATEGIES.iter().map(ToString::to_string).collect();
    let strategy_index = Select::new()
        .with_prompt("When a conversation does not fit")
        .default(strategy_position(config.context.strategy))
        .items(&labels)
        .interact()?;

    // Shrink the reserve first so the new maximum is accepted
    config.context.reserve_tokens = 0;
    config.set_max_tokens(max_tokens)?;
    config.set_reserve_tokens(reserve_tokens)?;
    config.context.strategy = STRATEGIES[strategy_index];

    Ok(())
}

fn strategy_position(strategy: OverflowStrategy) -> usize {
    STRATEGIES.iter().position(|&s| s == strategy).unwrap_or(0)
}

/// Embed a short probe text and report the vector length
fn test_remote_connection(remote: &RemoteEmbeddingConfig) -> Result<usize> {
    let client = RemoteEmbeddingClient::from_config(remote)?
        .with_timeout(std::time::Duration::from_secs(5))
        .with_retry_attempts(1);
    let vector = client.embed_blocking("connection test")?;
    Ok(vector.len())
}
