// src/main.rs
use anyhow::{Context, Result};
use clap::Parser;
use market_signals::app::{HistoryRequest, PriceSource, SignalApp};
use market_signals::config::AppConfig;
use market_signals::market_data::PriceHistoryClient;
use market_signals::throttle::{HttpFetcher, Throttle};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(about = "RSI/MACD trading signals for a crypto price history")]
struct Cli {
    #[arg(long, value_enum, default_value_t = PriceSource::Coingecko)]
    source: PriceSource,

    /// CoinGecko coin id (e.g. bitcoin) or Binance pair (e.g. BTCUSDT)
    #[arg(long, default_value = "bitcoin")]
    symbol: String,

    /// days of history (coingecko)
    #[arg(long, default_value_t = 30)]
    days: u32,

    /// kline interval (binance)
    #[arg(long, default_value = "1h")]
    interval: String,

    /// number of klines (binance)
    #[arg(long, default_value_t = 200)]
    limit: u32,

    #[arg(long, default_value = "config")]
    config_dir: String,

    /// print only the latest signal and stats
    #[arg(long, default_value_t = false)]
    summary: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Arc::new(
        AppConfig::from_dir(&cli.config_dir)
            .with_context(|| format!("Failed to load config from {}", cli.config_dir))?,
    );

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("{} starting ({})", cfg.name, cfg.environment);

    let fetcher = HttpFetcher::new(&cfg.upstream.user_agent).context("Failed to build HTTP client")?;
    let throttle = Throttle::start(Arc::new(fetcher), cfg.throttle.settings());
    let history = PriceHistoryClient::new(throttle.handle(), cfg.upstream.clone());
    let app = SignalApp::new(history, cfg.clone())?;

    let req = HistoryRequest {
        source: cli.source,
        symbol: cli.symbol,
        days: cli.days,
        interval: cli.interval,
        limit: cli.limit,
    };

    let outcome = app.get_market_analysis(&req).await;
    throttle.stop().await;
    if let Err(e) = &outcome {
        warn!(
            symbol = %req.symbol,
            transient = e.is_transient(),
            "analysis failed: {}",
            e
        );
    }
    let analysis = outcome.with_context(|| format!("Analysis failed for {}", req.symbol))?;

    let out = if cli.summary {
        serde_json::to_string_pretty(&serde_json::json!({
            "symbol": analysis.symbol,
            "latest_price": analysis.latest_price,
            "latest_signal": analysis.latest_signal,
            "stats": analysis.stats,
        }))?
    } else {
        serde_json::to_string_pretty(&analysis)?
    };
    println!("{}", out);
    Ok(())
}
