//! Point-in-time indicators over a closing-price series (oldest first).
//!
//! Every function returns `None` when the series is shorter than the window it
//! needs. Nothing here panics on short or empty input.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Simple Moving Average of the last `period` prices
pub fn sma(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() < period {
        return None;
    }

    let window = &data[data.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Exponential Moving Average, seeded with the raw price `period` points from the end.
///
/// This is not the SMA-seeded textbook EMA (see [`ema_series`]); values differ
/// from charting packages but are stable across runs and releases.
pub fn ema(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() < period {
        return None;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let start = data.len() - period;
    let mut ema = data[start];
    for &price in &data[start..] {
        ema = price * multiplier + ema * (1.0 - multiplier);
    }
    Some(ema)
}

/// SMA-seeded EMA series. Element `i` corresponds to `data[i + period - 1]`.
pub fn ema_series(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(data.len() - period + 1);
    let mut prev = data[..period].iter().sum::<f64>() / period as f64;
    result.push(prev);

    for &price in &data[period..] {
        prev = (price - prev) * multiplier + prev;
        result.push(prev);
    }

    result
}

/// Relative Strength Index over the last `period` price changes (simple averages).
pub fn rsi(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() < period + 1 {
        return None;
    }

    let window = &data[data.len() - period - 1..];
    let (gain_sum, loss_sum) = window.windows(2).fold((0.0, 0.0), |(gain, loss), w| {
        let change = w[1] - w[0];
        if change > 0.0 {
            (gain + change, loss)
        } else {
            (gain, loss + change.abs())
        }
    });

    let avg_gain = gain_sum / period as f64;
    let avg_loss = loss_sum / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// How the MACD signal line is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MacdSignalMode {
    /// Signal line equals the MACD line; no MACD history is kept.
    #[default]
    Legacy,
    /// Signal line is an EMA of the MACD line history, with SMA-seeded EMAs throughout.
    Textbook,
}

impl fmt::Display for MacdSignalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacdSignalMode::Legacy => write!(f, "legacy"),
            MacdSignalMode::Textbook => write!(f, "textbook"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown MACD signal mode: {0} (expected 'legacy' or 'textbook')")]
pub struct ParseMacdModeError(String);

impl FromStr for MacdSignalMode {
    type Err = ParseMacdModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(MacdSignalMode::Legacy),
            "textbook" => Ok(MacdSignalMode::Textbook),
            other => Err(ParseMacdModeError(other.to_string())),
        }
    }
}

/// MACD (Moving Average Convergence Divergence), latest values only
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdResult {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD with the legacy signal line (`signal == macd`).
pub fn macd(data: &[f64], fast_period: usize, slow_period: usize, signal_period: usize) -> Option<MacdResult> {
    macd_with_mode(data, fast_period, slow_period, signal_period, MacdSignalMode::Legacy)
}

pub fn macd_with_mode(
    data: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
    mode: MacdSignalMode,
) -> Option<MacdResult> {
    if fast_period == 0 || slow_period == 0 || signal_period == 0 {
        return None;
    }
    if data.len() < slow_period.max(signal_period) + 1 {
        return None;
    }

    match mode {
        MacdSignalMode::Legacy => {
            let macd_line = ema(data, fast_period)? - ema(data, slow_period)?;
            Some(MacdResult {
                macd: macd_line,
                signal: macd_line,
                histogram: 0.0,
            })
        }
        MacdSignalMode::Textbook => textbook_macd(data, fast_period, slow_period, signal_period),
    }
}

fn textbook_macd(data: &[f64], fast_period: usize, slow_period: usize, signal_period: usize) -> Option<MacdResult> {
    let fast = ema_series(data, fast_period);
    let slow = ema_series(data, slow_period);
    if fast.is_empty() || slow.is_empty() {
        return None;
    }

    // Align both series on data indices where both EMAs exist.
    let first = fast_period.max(slow_period) - 1;
    let macd_line: Vec<f64> = (first..data.len())
        .map(|t| fast[t + 1 - fast_period] - slow[t + 1 - slow_period])
        .collect();

    let signal_line = ema_series(&macd_line, signal_period);
    let macd = *macd_line.last()?;
    let signal = *signal_line.last()?;

    Some(MacdResult {
        macd,
        signal,
        histogram: macd - signal,
    })
}
