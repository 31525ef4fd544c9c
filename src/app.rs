// src/app.rs
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::indicators::IndicatorParams;
use crate::market_data::PriceHistoryClient;
use crate::signals::{
    PricePoint, SignalStats, TradingSignal, generate_trading_signals_with, get_latest_signal,
    get_signal_stats,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Coingecko,
    Binance,
}

/// What to fetch: CoinGecko uses `days`, Binance uses `interval` and `limit`.
#[derive(Debug, Clone)]
pub struct HistoryRequest {
    pub source: PriceSource,
    pub symbol: String,
    pub days: u32,
    pub interval: String,
    pub limit: u32,
}

#[derive(Clone)]
pub struct SignalApp {
    history: PriceHistoryClient,
    config: Arc<AppConfig>,
}

#[derive(Debug, Serialize)]
pub struct MarketAnalysis {
    pub symbol: String,
    pub source: PriceSource,
    pub params: IndicatorParams,
    pub data_points: usize,
    pub latest_price: Option<PricePoint>,
    pub latest_signal: Option<TradingSignal>,
    pub stats: SignalStats,
    pub signals: Vec<TradingSignal>,
    pub generated_at: DateTime<Utc>,
}

impl SignalApp {
    pub fn new(history: PriceHistoryClient, config: Arc<AppConfig>) -> Result<Self> {
        config.indicators.validate()?;
        Ok(Self { history, config })
    }

    #[instrument(skip(self))]
    pub async fn fetch_history(&self, req: &HistoryRequest) -> Result<Vec<PricePoint>> {
        match req.source {
            PriceSource::Coingecko => self.history.coingecko_history(&req.symbol, req.days).await,
            PriceSource::Binance => {
                self.history
                    .binance_history(&req.symbol, &req.interval, req.limit)
                    .await
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn get_market_analysis(&self, req: &HistoryRequest) -> Result<MarketAnalysis> {
        let points = self.fetch_history(req).await?;
        if points.is_empty() {
            return Err(AppError::DataNotFound(format!(
                "No price history for {} from {:?}",
                req.symbol, req.source
            )));
        }
        Ok(self.analyze(req.source, &req.symbol, &points))
    }

    /// Signals and summary for an already-fetched series.
    pub fn analyze(&self, source: PriceSource, symbol: &str, points: &[PricePoint]) -> MarketAnalysis {
        let params = self.config.indicators;
        let signals = generate_trading_signals_with(points, &params);
        let stats = get_signal_stats(&signals);
        debug!(
            "Generated {} signals for {} from {} prices",
            signals.len(),
            symbol,
            points.len()
        );
        if signals.is_empty() {
            info!(
                symbol,
                needed = params.macd_offset().max(params.rsi_period) + 1,
                have = points.len(),
                "not enough history for signals"
            );
        }

        MarketAnalysis {
            symbol: symbol.to_string(),
            source,
            params,
            data_points: points.len(),
            latest_price: points.last().copied(),
            latest_signal: get_latest_signal(&signals).cloned(),
            stats,
            signals,
            generated_at: Utc::now(),
        }
    }
}
