// src/signals.rs
use crate::indicators::{Crossover, IndicatorParams, MacdPoint, calculate_macd, calculate_rsi};
use serde::{Deserialize, Serialize};

/// RSI at or below this marks the series as recently oversold.
pub const OVERSOLD_THRESHOLD: f64 = 30.0;

const BUY_BASE_STRENGTH: f64 = 70.0;
const SELL_BASE_STRENGTH: f64 = 60.0;
const HOLD_STRENGTH: f64 = 50.0;
const MAX_STRENGTH: f64 = 100.0;

/// One closing price with the caller's timestamp (epoch millis).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub ts: i64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradingSignal {
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub strength: f64,
    pub reason: String,
    pub timestamp: i64,
    pub rsi: f64,
    pub macd: MacdPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OversoldState {
    #[default]
    Neutral,
    RecentlyOversold,
}

/// Buy/sell/hold rules over aligned RSI and MACD readings.
///
/// A bullish crossover only buys if RSI touched the oversold zone since the
/// last buy. Bearish crossovers always sell.
#[derive(Debug, Default)]
pub struct SignalMachine {
    state: OversoldState,
}

impl SignalMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> OversoldState {
        self.state
    }

    pub fn step(&mut self, timestamp: i64, rsi: f64, macd: MacdPoint) -> TradingSignal {
        if rsi <= OVERSOLD_THRESHOLD {
            self.state = OversoldState::RecentlyOversold;
        }

        let (signal_type, strength, reason) = match (macd.crossover, self.state) {
            (Crossover::Bullish, OversoldState::RecentlyOversold) => {
                self.state = OversoldState::Neutral;
                let strength = BUY_BASE_STRENGTH
                    + (OVERSOLD_THRESHOLD - rsi.min(OVERSOLD_THRESHOLD))
                    + (macd.histogram * 10.0).max(0.0);
                (
                    SignalType::Buy,
                    strength.min(MAX_STRENGTH),
                    format!(
                        "Bullish MACD crossover after oversold RSI (rsi {:.2}, histogram {:.4})",
                        rsi, macd.histogram
                    ),
                )
            }
            (Crossover::Bearish, _) => {
                let strength = SELL_BASE_STRENGTH + (macd.histogram.abs() * 10.0).max(0.0);
                (
                    SignalType::Sell,
                    strength.min(MAX_STRENGTH),
                    format!(
                        "Bearish MACD crossover (macd {:.4} < signal {:.4}, rsi {:.2})",
                        macd.macd, macd.signal, rsi
                    ),
                )
            }
            _ => (
                SignalType::Hold,
                HOLD_STRENGTH,
                format!("No actionable setup (rsi {:.2}, macd {:.4})", rsi, macd.macd),
            ),
        };

        TradingSignal {
            signal_type,
            strength,
            reason,
            timestamp,
            rsi,
            macd,
        }
    }
}

/// Signals with the default RSI(14) and MACD(8, 21, 5) periods.
pub fn generate_trading_signals(points: &[PricePoint]) -> Vec<TradingSignal> {
    generate_trading_signals_with(points, &IndicatorParams::default())
}

/// One signal per MACD point that also has an RSI reading at the same price index.
pub fn generate_trading_signals_with(
    points: &[PricePoint],
    params: &IndicatorParams,
) -> Vec<TradingSignal> {
    let prices: Vec<f64> = points.iter().map(|p| p.price).collect();
    let rsi = calculate_rsi(&prices, params.rsi_period);
    let macd = calculate_macd(
        &prices,
        params.macd_fast,
        params.macd_slow,
        params.macd_signal,
    );
    if rsi.is_empty() || macd.is_empty() {
        return Vec::new();
    }

    let offset = params.macd_offset();
    let mut machine = SignalMachine::new();

    macd.iter()
        .enumerate()
        .filter_map(|(k, point)| {
            let idx = offset + k;
            // rsi[0] sits at prices[rsi_period]
            let rsi_value = *rsi.get(idx.checked_sub(params.rsi_period)?)?;
            Some(machine.step(points[idx].ts, rsi_value, *point))
        })
        .collect()
}

pub fn get_latest_signal(signals: &[TradingSignal]) -> Option<&TradingSignal> {
    signals.last()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalStats {
    pub total: usize,
    pub buy: usize,
    pub sell: usize,
    pub hold: usize,
    /// Share of actionable (buy or sell) signals, in percent.
    pub accuracy: f64,
}

pub fn get_signal_stats(signals: &[TradingSignal]) -> SignalStats {
    let count = |t: SignalType| signals.iter().filter(|s| s.signal_type == t).count();
    let buy = count(SignalType::Buy);
    let sell = count(SignalType::Sell);
    let hold = count(SignalType::Hold);
    let total = signals.len();
    let accuracy = if total == 0 {
        0.0
    } else {
        (buy + sell) as f64 / total as f64 * 100.0
    };

    SignalStats {
        total,
        buy,
        sell,
        hold,
        accuracy,
    }
}
