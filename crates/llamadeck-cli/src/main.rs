use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use llamadeck_client::{ModelTransport, OllamaClient};
use llamadeck_core::{format_size, DownloadStatus, LlamaDeckConfig, UnifiedModel};
use llamadeck_services::{DownloadManager, ModelStateAggregator};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "llamadeck")]
#[command(about = "LlamaDeck - dashboard for local Ollama models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Ollama host URL (overrides OLLAMA_HOST)
    #[arg(long, global = true)]
    ollama_host: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List installed models with their load state
    Models,

    /// Pull a model, streaming progress until it finishes (Ctrl-C cancels)
    Pull {
        /// Model name (e.g. llama3.2:latest)
        model: String,
    },

    /// Delete an installed model
    Rm {
        /// Model name to delete
        model: String,
    },

    /// Show daemon connectivity and model counts
    Status,
}

fn load_config(host_flag: Option<String>) -> LlamaDeckConfig {
    let mut config = LlamaDeckConfig::from_env();
    if let Some(host) = host_flag {
        config.daemon.host = host;
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.ollama_host);

    match cli.command {
        Commands::Models => cmd_models(&config).await?,
        Commands::Pull { model } => cmd_pull(&config, &model).await?,
        Commands::Rm { model } => cmd_rm(&config, &model).await?,
        Commands::Status => cmd_status(&config).await?,
    }

    Ok(())
}

async fn cmd_models(config: &LlamaDeckConfig) -> Result<()> {
    let client = OllamaClient::new(&config.daemon)?;
    let transport: Arc<dyn ModelTransport> = Arc::new(client);
    let aggregator = ModelStateAggregator::new(transport, &config.poll);

    let snapshot = aggregator.refresh().await?;

    println!();
    println!("Installed Models:");
    println!("{:-<78}", "");
    println!(
        "  {:<36} {:>10} {:>7} {:>8} {:>10}",
        "NAME", "SIZE", "LOADED", "VRAM", "EXPIRES"
    );
    println!("{:-<78}", "");
    for model in &snapshot.models {
        println!(
            "  {:<36} {:>10} {:>7} {:>8} {:>10}",
            model.name,
            format_size(model.size_bytes),
            if model.loaded { "yes" } else { "-" },
            model
                .vram_gb
                .map(|gb| format!("{:.1} GB", gb))
                .unwrap_or_else(|| "-".to_string()),
            format_expiry(model),
        );
    }
    println!();

    Ok(())
}

fn format_expiry(model: &UnifiedModel) -> String {
    match model.expires_in_seconds {
        Some(secs) if secs >= 60 => format!("{}m{}s", secs / 60, secs % 60),
        Some(secs) => format!("{}s", secs),
        None => "-".to_string(),
    }
}

async fn cmd_pull(config: &LlamaDeckConfig, model: &str) -> Result<()> {
    let client = OllamaClient::new(&config.daemon)?;
    let transport: Arc<dyn ModelTransport> = Arc::new(client);
    let aggregator = ModelStateAggregator::new(transport.clone(), &config.poll);
    let downloads = DownloadManager::new(transport, aggregator.refresh_handle(), &config.download);

    println!("Pulling {} ...", model);
    let id = downloads.start(model);

    let mut stdout = io::stdout();
    let mut cancel_requested = false;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c(), if !cancel_requested => {
                signal?;
                println!();
                println!("Cancelling ...");
                downloads.cancel(id);
                cancel_requested = true;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
        }

        let Some(snapshot) = downloads.get(id) else {
            break;
        };

        if snapshot.status == DownloadStatus::Downloading {
            let detail = match (snapshot.completed_bytes, snapshot.total_bytes) {
                (Some(done), Some(total)) => {
                    format!("{} / {}", format_size(done), format_size(total))
                }
                _ => String::new(),
            };
            print!(
                "\r  {:<24} {:>4} {:>24}",
                snapshot.status_text,
                snapshot
                    .progress_percent
                    .map(|p| format!("{}%", p))
                    .unwrap_or_default(),
                detail,
            );
            stdout.flush()?;
        }

        if snapshot.status.is_terminal() {
            println!();
            match snapshot.status {
                DownloadStatus::Completed => println!("Pulled {}", model),
                DownloadStatus::Cancelled => println!("Cancelled pull of {}", model),
                DownloadStatus::Failed => {
                    anyhow::bail!(
                        "pull failed: {}",
                        snapshot.error.unwrap_or_else(|| "unknown error".to_string())
                    );
                }
                _ => {}
            }
            break;
        }
    }

    Ok(())
}

async fn cmd_rm(config: &LlamaDeckConfig, model: &str) -> Result<()> {
    let client = OllamaClient::new(&config.daemon)?;
    client.delete(model).await?;
    println!("Deleted {}", model);
    Ok(())
}

async fn cmd_status(config: &LlamaDeckConfig) -> Result<()> {
    let client = OllamaClient::new(&config.daemon)?;

    println!("System Status:");
    println!("{:-<40}", "");
    println!("  Ollama Host: {}", client.host());

    match client.list_models().await {
        Ok(models) => {
            println!("  Ollama: connected ({} models installed)", models.len());
            match client.list_loaded().await {
                Ok(running) => println!("  Loaded models: {}", running.len()),
                Err(e) => println!("  Loaded models: unavailable ({})", e),
            }
        }
        Err(e) => {
            println!("  Ollama: disconnected ({})", e);
        }
    }

    Ok(())
}
