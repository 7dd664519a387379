use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ethashb3::pow::{cache_size, dataset_size, EpochItem};
use ethashb3::{make_cache, make_dataset, PowConfig};

// ========= CLI =========

#[derive(Parser, Debug)]
#[command(name = "ethashb3", version, about = "ethashb3 cache and DAG tool")]
struct Cli {
    /// TOML engine config (defaults plus ETHASHB3_* environment otherwise)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate the verification cache for a block into a directory
    Makecache { block: u64, dir: PathBuf },

    /// Generate the full mining dataset for a block into a directory
    Makedag { block: u64, dir: PathBuf },

    /// Print epoch, epoch length and seed for a block
    Seed { block: u64 },

    /// Print cache and dataset sizes for a block
    Sizes { block: u64 },
}

fn main() -> Result<()> {
    // init tracing from env ETHASHB3_LOG or RUST_LOG
    let filter = std::env::var("ETHASHB3_LOG")
        .unwrap_or_else(|_| std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PowConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PowConfig::from_env().context("reading ETHASHB3_* environment")?,
    };
    let schedule = config.epoch_schedule;

    match cli.cmd {
        Commands::Makecache { block, dir } => {
            let cache = make_cache(&schedule, block, &dir)
                .with_context(|| format!("generating cache for block {}", block))?;
            info!(block, epoch = cache.epoch(), dir = %dir.display(), "[ETHASH] Cache ready");
        }

        Commands::Makedag { block, dir } => {
            let dataset = make_dataset(&schedule, block, &dir)
                .with_context(|| format!("generating dataset for block {}", block))?;
            info!(block, epoch = dataset.epoch(), dir = %dir.display(), "[ETHASH] Dataset ready");
        }

        Commands::Seed { block } => {
            let (epoch, epoch_length) = schedule.epoch_of(block);
            let seed = schedule.seed_hash(epoch, epoch_length);
            println!("block:        {}", block);
            println!("epoch:        {}", epoch);
            println!("epoch length: {}", epoch_length);
            println!("seed:         0x{}", hex::encode(seed));
        }

        Commands::Sizes { block } => {
            let (epoch, _) = schedule.epoch_of(block);
            println!("epoch:   {}", epoch);
            println!("cache:   {} bytes", cache_size(epoch));
            println!("dataset: {} bytes", dataset_size(epoch));
        }
    }
    Ok(())
}
