use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use imgshelf::config::{Config, SimilarityStrategy};
use imgshelf::embedding::ProcessExtractor;
use imgshelf::similarity::{self, clamp_threshold, HashEngine, VectorEngine};
use imgshelf::tasks::VectorWorker;
use imgshelf::{logging, server};

#[derive(Parser)]
#[command(name = "imgshelf", version, about = "Image tagging, OCR and near-duplicate detection server")]
struct Cli {
    /// Config file (created with defaults if missing)
    #[arg(short, long, global = true, env = "IMGSHELF_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve {
        /// Address to bind, overrides the config file
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on, overrides the config file
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print near-duplicate pairs as JSON
    Scan {
        /// Minimum similarity in [0, 1]; values outside are clamped
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Comparison strategy, overrides the config file
        #[arg(short, long, value_enum)]
        strategy: Option<StrategyArg>,
    },

    /// Compute missing embedding vectors and report how many succeeded
    Backfill,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Vector,
    Hash,
}

impl From<StrategyArg> for SimilarityStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Vector => SimilarityStrategy::Vector,
            StrategyArg::Hash => SimilarityStrategy::Hash,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&config_path)?;

    logging::init(&config.logging)?;
    tracing::debug!(path = %config_path.display(), "Loaded configuration");

    match cli.command.unwrap_or(Command::Serve { host: None, port: None }) {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            server::run(config, Some(config_path)).await
        }
        Command::Scan { threshold, strategy } => scan(&config, threshold, strategy).await,
        Command::Backfill => backfill(&config).await,
    }
}

async fn scan(config: &Config, threshold: Option<f64>, strategy: Option<StrategyArg>) -> Result<()> {
    let threshold = threshold
        .filter(|t| t.is_finite())
        .map(clamp_threshold)
        .unwrap_or(config.similarity.default_threshold);
    let strategy = strategy.map(SimilarityStrategy::from).unwrap_or(config.similarity.strategy);

    let db = server::open_database(config)?;
    let uploads_dir = config.storage.uploads_dir.clone();

    let results = tokio::task::spawn_blocking(move || -> Result<_> {
        let images = db.get_all_images()?;
        Ok(match strategy {
            SimilarityStrategy::Vector => similarity::scan(&VectorEngine, &images, threshold),
            SimilarityStrategy::Hash => similarity::scan(&HashEngine::new(uploads_dir), &images, threshold),
        })
    })
    .await
    .context("Scan task panicked")??;

    let output = serde_json::json!({ "results": results, "threshold": threshold });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn backfill(config: &Config) -> Result<()> {
    let db = server::open_database(config)?;

    let pending = {
        let db = Arc::clone(&db);
        tokio::task::spawn_blocking(move || db.get_images_without_vector())
            .await
            .context("Database task panicked")??
    };

    if pending.is_empty() {
        println!("All images already have vectors");
        return Ok(());
    }

    tracing::info!(count = pending.len(), "Computing missing vectors");

    let worker = VectorWorker::new(
        db,
        Arc::new(ProcessExtractor::from_config(&config.embedding)),
        config.storage.uploads_dir.clone(),
    );
    let report = worker.run_batch(pending).await;

    println!(
        "{} images processed: {} stored, {} failed",
        report.total, report.stored, report.failed
    );
    Ok(())
}
