// src/indicators.rs
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// EMA, RSI and MACD over an ascending series of closing prices.
/// All functions are pure; too little history yields an empty series, not an error.

pub const DEFAULT_RSI_PERIOD: usize = 14;
pub const DEFAULT_MACD_FAST: usize = 8;
pub const DEFAULT_MACD_SLOW: usize = 21;
pub const DEFAULT_MACD_SIGNAL: usize = 5;

/// Streaming EMA seeded with the simple average of the first `period` values.
#[derive(Debug)]
pub struct EMA {
    period: usize,
    mult: f64,
    seed_sum: f64,
    seen: usize,
    current: Option<f64>,
}

impl EMA {
    pub fn new(period: usize) -> Self {
        let mult = 2.0 / (period as f64 + 1.0);
        EMA {
            period,
            mult,
            seed_sum: 0.0,
            seen: 0,
            current: None,
        }
    }

    /// Feed one value. Returns `None` until the seed window is full.
    pub fn next(&mut self, value: f64) -> Option<f64> {
        if self.period == 0 {
            return None;
        }
        match self.current {
            Some(prev) => {
                let v = (value - prev) * self.mult + prev;
                self.current = Some(v);
                Some(v)
            }
            None => {
                self.seed_sum += value;
                self.seen += 1;
                if self.seen == self.period {
                    let sma = self.seed_sum / self.period as f64;
                    self.current = Some(sma);
                    Some(sma)
                } else {
                    None
                }
            }
        }
    }
}

/// Periods used by the signal pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_period: DEFAULT_RSI_PERIOD,
            macd_fast: DEFAULT_MACD_FAST,
            macd_slow: DEFAULT_MACD_SLOW,
            macd_signal: DEFAULT_MACD_SIGNAL,
        }
    }
}

impl IndicatorParams {
    pub fn validate(&self) -> Result<()> {
        if self.rsi_period == 0 || self.macd_fast == 0 || self.macd_signal == 0 {
            return Err(AppError::Validation(format!(
                "indicator periods must be positive: {:?}",
                self
            )));
        }
        if self.macd_fast >= self.macd_slow {
            return Err(AppError::Validation(format!(
                "MACD fast period {} must be shorter than slow period {}",
                self.macd_fast, self.macd_slow
            )));
        }
        Ok(())
    }

    /// Index in the price series of the first MACD point.
    pub fn macd_offset(&self) -> usize {
        self.macd_slow + self.macd_signal - 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Crossover {
    Bullish,
    Bearish,
    None,
}

impl Crossover {
    /// Classify the move from `prev` to `curr`, each a `(macd, signal)` pair.
    pub fn between(prev: (f64, f64), curr: (f64, f64)) -> Self {
        let (prev_macd, prev_signal) = prev;
        let (macd, signal) = curr;
        if prev_macd <= prev_signal && macd > signal {
            Crossover::Bullish
        } else if prev_macd >= prev_signal && macd < signal {
            Crossover::Bearish
        } else {
            Crossover::None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub crossover: Crossover,
}

/// EMA series of length `prices.len() - period + 1`, or empty if there is not enough data.
pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }
    let mut ema = EMA::new(period);
    let mut out = Vec::with_capacity(prices.len() - period + 1);
    for price in prices {
        if let Some(v) = ema.next(*price) {
            out.push(v);
        }
    }
    out
}

/// Wilder-smoothed RSI. The first value corresponds to `prices[period]`.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let p = period as f64;

    let (gain_sum, loss_sum) = deltas[..period]
        .iter()
        .fold((0.0, 0.0), |(gain, loss), d| {
            if *d > 0.0 {
                (gain + d, loss)
            } else {
                (gain, loss - d)
            }
        });
    let mut avg_gain = gain_sum / p;
    let mut avg_loss = loss_sum / p;

    let mut out = Vec::with_capacity(deltas.len() - period + 1);
    out.push(rsi_from_averages(avg_gain, avg_loss));

    for d in &deltas[period..] {
        let gain = d.max(0.0);
        let loss = (-d).max(0.0);
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
        out.push(rsi_from_averages(avg_gain, avg_loss));
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    // no losses in the window: RS is unbounded, RSI saturates
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Crossover flags for two index-aligned series. The first entry is always `None`.
pub fn crossovers(macd: &[f64], signal: &[f64]) -> Vec<Crossover> {
    let len = macd.len().min(signal.len());
    (0..len)
        .map(|i| {
            if i == 0 {
                Crossover::None
            } else {
                Crossover::between((macd[i - 1], signal[i - 1]), (macd[i], signal[i]))
            }
        })
        .collect()
}

/// MACD series with one point per index where the signal EMA exists.
/// Point `i` sits at `prices[slow + signal - 2 + i]`.
pub fn calculate_macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<MacdPoint> {
    if fast == 0 || signal == 0 || fast >= slow || prices.len() < slow {
        return Vec::new();
    }

    let fast_ema = calculate_ema(prices, fast);
    let slow_ema = calculate_ema(prices, slow);

    // fast EMA starts `slow - fast` prices earlier
    let offset = slow - fast;
    let macd_line: Vec<f64> = fast_ema
        .iter()
        .skip(offset)
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_line = calculate_ema(&macd_line, signal);
    if signal_line.is_empty() {
        return Vec::new();
    }

    let aligned = &macd_line[signal - 1..];
    let flags = crossovers(aligned, &signal_line);

    aligned
        .iter()
        .zip(signal_line.iter())
        .zip(flags)
        .map(|((macd, signal), crossover)| MacdPoint {
            macd: *macd,
            signal: *signal,
            histogram: macd - signal,
            crossover,
        })
        .collect()
}
