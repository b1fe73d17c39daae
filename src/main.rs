/// Quote bar conversion tool
/// Usage: quotebars <destination> [--config config.toml] [--market fxcm]
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use quotebars::{
    config::load_config,
    data::{ApiDataProvider, DefaultDataProvider},
    ConversionReport, ConverterConfig, QuoteBarConverter,
};

#[derive(Parser, Debug)]
#[command(name = "quotebars", about = "Convert tick quote data into second/minute/hour/daily quote bars")]
struct Cli {
    /// Destination data directory for the generated bars
    destination: PathBuf,

    /// Configuration file (defaults to $CONFIG_PATH, then config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only convert the source with this market name
    #[arg(long)]
    market: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("🚀 Quote Bar Converter");
    info!("======================");

    let config_path = cli
        .config
        .or_else(|| std::env::var_os("CONFIG_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    info!("📋 Loading configuration from {}", config_path.display());
    let config = Arc::new(
        load_config(&config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?,
    );

    let market = cli.market.as_deref();
    let report = match &config.api {
        Some(api) => {
            info!("🌐 Remote data library enabled: {}", api.base_url);
            let provider = Arc::new(ApiDataProvider::new(api, &config.data_directory));
            QuoteBarConverter::new(provider, Arc::clone(&config), &cli.destination)
                .run(market)
                .await?
        }
        None => {
            QuoteBarConverter::new(Arc::new(DefaultDataProvider), Arc::clone(&config), &cli.destination)
                .run(market)
                .await?
        }
    };

    finish(&config, &report).await
}

async fn finish(config: &ConverterConfig, report: &ConversionReport) -> anyhow::Result<()> {
    report.log_summary();

    if let Some(path) = &config.report_path {
        if let Err(e) = report.save(path).await {
            error!("❌ Failed to save report: {}", e);
        }
    }

    if !report.is_success() {
        bail!("{} conversion(s) failed", report.failures.len());
    }
    Ok(())
}
