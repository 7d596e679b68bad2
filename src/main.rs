//! BoundBot - constraint-arbitrage trading daemon for binary contracts
//! Mission: Find prices that logic forbids, and be there first

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use boundbot_backend::bot::TradingBot;
use boundbot_backend::config::Config;
use boundbot_backend::exchange::RestClient;

#[derive(Debug, Parser)]
#[command(name = "boundbot", about = "Binary-contract constraint arbitrage bot")]
struct Args {
    /// Submit real orders instead of paper fills.
    #[arg(long)]
    live: bool,

    /// Override the inter-tick sleep in seconds.
    #[arg(long, env = "SCAN_INTERVAL_SECONDS")]
    scan_interval: Option<f64>,

    /// Override the minimum net edge threshold.
    #[arg(long, env = "MIN_EDGE_THRESHOLD")]
    min_edge: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = Config::from_env().context("failed to load configuration")?;
    if args.live {
        config.paper_trading = false;
    }
    if let Some(interval) = args.scan_interval {
        config.scan_interval_seconds = interval;
    }
    if let Some(edge) = args.min_edge {
        config.min_edge_threshold = edge;
    }

    if !config.paper_trading && config.api_key.is_empty() {
        anyhow::bail!("live trading requires EXCHANGE_API_KEY / EXCHANGE_API_SECRET");
    }

    let client = Arc::new(
        RestClient::new(&config.base_url, &config.api_key, &config.api_secret)
            .context("failed to build exchange client")?,
    );

    info!(
        paper = config.paper_trading,
        base_url = %config.base_url,
        "boundbot starting"
    );

    let mut bot = TradingBot::new(config, client);
    let flags = bot.flags();

    // First ctrl-c drains (no new entries, keep managing exits);
    // second ctrl-c stops the loop.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("ctrl-c: draining - no new orders, exits continue");
            flags.write().draining = true;
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("ctrl-c again: stopping");
            flags.write().running = false;
        }
    });

    bot.run().await
}
