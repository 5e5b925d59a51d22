//! adforge CLI
//!
//! Generates one ad creative and prints it as JSON.
//!
//! ## Usage
//!
//! ```bash
//! # Placeholder banner only (no API key)
//! adforge "Launching a smart water bottle" --name Hydra --slogan "Drink smarter"
//!
//! # Generated banner, brand details scraped from the website
//! RUNWARE_API_KEY=... adforge "Summer sale" --website https://hydra.example
//!
//! # Custom config file
//! adforge "Summer sale" --config ./adforge.toml
//! ```

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use adforge::{default_config_path, AdFormat, Campaign, CampaignBrief, Config};

#[derive(Parser, Debug)]
#[command(name = "adforge")]
#[command(about = "Generate an ad creative from a prompt and brand details")]
struct Args {
    /// What the ad is about
    prompt: String,

    /// Path to config file (defaults to the platform config dir if present)
    #[arg(short, long, env = "ADFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Image-inference WebSocket URL
    #[arg(long, env = "RUNWARE_ENDPOINT")]
    endpoint: Option<String>,

    /// Image-inference API key. Without one the banner is a placeholder.
    #[arg(long, env = "RUNWARE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Brand scraper URL
    #[arg(long, env = "SCRAPER_URL")]
    scraper_url: Option<String>,

    /// Brand name
    #[arg(long)]
    name: Option<String>,

    /// Brand slogan
    #[arg(long)]
    slogan: Option<String>,

    /// Brand website, scraped for missing details
    #[arg(long)]
    website: Option<String>,

    #[arg(long)]
    instagram: Option<String>,

    #[arg(long)]
    facebook: Option<String>,

    #[arg(long)]
    twitter: Option<String>,

    /// Creative format (image or video)
    #[arg(long, default_value = "image")]
    format: AdFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("adforge={},info", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load config
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let path = default_config_path();
            if path.exists() {
                Config::load(&path)
                    .with_context(|| format!("Failed to load config from {}", path.display()))?
            } else {
                Config::default()
            }
        }
    };

    // Apply CLI overrides
    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(api_key) = args.api_key {
        config.api_key = Some(api_key);
    }
    if let Some(scraper_url) = args.scraper_url {
        config.scraper_url = scraper_url;
    }

    info!(
        endpoint = %config.endpoint,
        image_generation = config.credential().is_some(),
        "Starting adforge"
    );

    let campaign = Campaign::from_config(&config)?;
    let brief = CampaignBrief {
        prompt: args.prompt,
        name: args.name,
        slogan: args.slogan,
        website: args.website,
        instagram: args.instagram,
        facebook: args.facebook,
        twitter: args.twitter,
        format: args.format,
    };

    let result = campaign.generate(&brief).await;
    campaign.shutdown().await;

    let creative = result?;
    println!("{}", serde_json::to_string_pretty(&creative)?);
    Ok(())
}
