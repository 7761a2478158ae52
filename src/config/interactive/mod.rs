
use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Password, Select};

use super::settings::{parse_endpoint, validate_table_name};
use super::{Config, mask_secret};
use crate::embeddings::EmbeddingFailurePolicy;

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Table Indexer Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir);

    eprintln!("{}", style("Source Table").bold().yellow());
    configure_source(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Search Service").bold().yellow());
    configure_search(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Text Generation").bold().yellow());
    configure_completion(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Embeddings").bold().yellow());
    configure_embedding(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Pipeline").bold().yellow());
    configure_pipeline(&mut config)?;

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
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Source:").bold().yellow());
    eprintln!("  Database URL: {}", style(&config.source.database_url).cyan());
    eprintln!("  Table: {}", style(&config.source.table).cyan());
    eprintln!(
        "  Key column: {}",
        style(config.source.key_column.as_deref().unwrap_or("(generated id)")).cyan()
    );
    eprintln!("  Row limit: {}", style(config.source.row_limit).cyan());

    eprintln!();
    eprintln!("{}", style("Search:").bold().yellow());
    eprintln!("  Endpoint: {}", style(&config.search.endpoint).cyan());
    eprintln!("  API key: {}", style(mask_secret(&config.search.api_key)).cyan());
    eprintln!("  Index: {}", style(&config.search.index_name).cyan());
    eprintln!(
        "  Upload batch size: {}",
        style(config.search.upload_batch_size).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Text Generation:").bold().yellow());
    eprintln!("  Endpoint: {}", style(&config.completion.endpoint).cyan());
    eprintln!(
        "  API key: {}",
        style(mask_secret(&config.completion.api_key)).cyan()
    );
    eprintln!("  Deployment: {}", style(&config.completion.deployment).cyan());
    eprintln!("  Language: {}", style(&config.completion.language).cyan());

    eprintln!();
    eprintln!("{}", style("Embeddings:").bold().yellow());
    eprintln!("  Endpoint: {}", style(&config.embedding.endpoint).cyan());
    eprintln!(
        "  API key: {}",
        style(mask_secret(&config.embedding.api_key)).cyan()
    );
    eprintln!("  Deployment: {}", style(&config.embedding.deployment).cyan());
    eprintln!("  Dimensions: {}", style(config.embedding.dimensions).cyan());

    eprintln!();
    eprintln!("{}", style("Pipeline:").bold().yellow());
    eprintln!("  Concurrency: {}", style(config.pipeline.concurrency).cyan());
    eprintln!(
        "  On embedding failure: {}",
        style(config.pipeline.on_embedding_failure).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Config {
    // Env overrides stay out: whatever the wizard keeps is written back to disk.
    Config::load_file(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No existing configuration found. Using defaults.").yellow()
            );
            Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            }
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            config
        },
    )
}

fn prompt_endpoint(prompt: &str, name: &'static str, current: &str) -> Result<String> {
    let endpoint: String = Input::new()
        .with_prompt(prompt)
        .with_initial_text(current)
        .validate_with(|input: &String| -> Result<(), String> {
            parse_endpoint(name, input).map(|_| ()).map_err(|e| e.to_string())
        })
        .interact_text()?;
    Ok(endpoint)
}

fn prompt_secret(prompt: &str, current: &str) -> Result<String> {
    let hint = if current.is_empty() {
        prompt.to_string()
    } else {
        format!("{prompt} (leave empty to keep {})", mask_secret(current))
    };
    let secret = Password::new()
        .with_prompt(hint)
        .allow_empty_password(!current.is_empty())
        .interact()?;
    Ok(if secret.is_empty() {
        current.to_string()
    } else {
        secret
    })
}

fn prompt_non_empty(prompt: &str, current: &str) -> Result<String> {
    let value: String = Input::new()
        .with_prompt(prompt)
        .with_initial_text(current)
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Value cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;
    Ok(value.trim().to_string())
}

fn configure_source(config: &mut Config) -> Result<()> {
    let source = &mut config.source;

    source.database_url = prompt_non_empty("Database URL (e.g. sqlite://data.db)", &source.database_url)?;

    let table: String = Input::new()
        .with_prompt("Table name")
        .with_initial_text(&source.table)
        .validate_with(|input: &String| -> Result<(), String> {
            validate_table_name(input).map_err(|e| e.to_string())
        })
        .interact_text()?;
    source.table = table;

    let key_column: String = Input::new()
        .with_prompt("Primary key column (leave empty to generate ids)")
        .with_initial_text(source.key_column.as_deref().unwrap_or_default())
        .allow_empty(true)
        .interact_text()?;
    source.key_column = Some(key_column.trim().to_string()).filter(|column| !column.is_empty());

    source.row_limit = Input::new()
        .with_prompt("Maximum rows to index")
        .default(source.row_limit)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (1..=100_000).contains(input) {
                Ok(())
            } else {
                Err("Row limit must be between 1 and 100000")
            }
        })
        .interact_text()?;

    Ok(())
}

fn configure_search(config: &mut Config) -> Result<()> {
    let search = &mut config.search;
    search.endpoint = prompt_endpoint("Search service endpoint", "search", &search.endpoint)?;
    search.api_key = prompt_secret("Search admin API key", &search.api_key)?;
    search.index_name = prompt_non_empty("Index name", &search.index_name)?;
    Ok(())
}

fn configure_completion(config: &mut Config) -> Result<()> {
    let completion = &mut config.completion;
    completion.endpoint =
        prompt_endpoint("Text generation endpoint", "completion", &completion.endpoint)?;
    completion.api_key = prompt_secret("Text generation API key", &completion.api_key)?;
    completion.deployment = prompt_non_empty("Chat deployment name", &completion.deployment)?;
    completion.language = prompt_non_empty("Summary language", &completion.language)?;
    Ok(())
}

fn configure_embedding(config: &mut Config) -> Result<()> {
    let same_endpoint = !config.completion.endpoint.is_empty()
        && Confirm::new()
            .with_prompt("Use the same endpoint and key for embeddings?")
            .default(config.embedding.endpoint.is_empty()
                || config.embedding.endpoint == config.completion.endpoint)
            .interact()?;

    let embedding = &mut config.embedding;
    if same_endpoint {
        embedding.endpoint = config.completion.endpoint.clone();
        embedding.api_key = config.completion.api_key.clone();
    } else {
        embedding.endpoint = prompt_endpoint("Embedding endpoint", "embedding", &embedding.endpoint)?;
        embedding.api_key = prompt_secret("Embedding API key", &embedding.api_key)?;
    }
    embedding.deployment = prompt_non_empty("Embedding deployment name", &embedding.deployment)?;
    embedding.dimensions = Input::new()
        .with_prompt("Embedding dimensions")
        .default(embedding.dimensions)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (1..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimensions must be between 1 and 4096")
            }
        })
        .interact_text()?;
    Ok(())
}

fn configure_pipeline(config: &mut Config) -> Result<()> {
    let pipeline = &mut config.pipeline;
    pipeline.concurrency = Input::new()
        .with_prompt("Records enriched in parallel")
        .default(pipeline.concurrency)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=64).contains(input) {
                Ok(())
            } else {
                Err("Concurrency must be between 1 and 64")
            }
        })
        .interact_text()?;

    let policies = [
        EmbeddingFailurePolicy::Abort,
        EmbeddingFailurePolicy::Skip,
        EmbeddingFailurePolicy::ZeroVector,
    ];
    let default_index = policies
        .iter()
        .position(|&p| p == pipeline.on_embedding_failure)
        .unwrap_or(0);
    let labels: Vec<String> = policies.iter().map(ToString::to_string).collect();
    let index = Select::new()
        .with_prompt("When an embedding fails")
        .default(default_index)
        .items(&labels)
        .interact()?;
    pipeline.on_embedding_failure = policies[index];

    Ok(())
}
