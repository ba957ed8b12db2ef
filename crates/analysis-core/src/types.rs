use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Daily closing prices, oldest first.
pub type PriceSeries = Vec<f64>;

/// Technical indicators derived from a [`PriceSeries`].
///
/// A field is `None` when the series is too short for that indicator's window.
/// It is never zero-filled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Indicators {
    pub sma20: Option<f64>,
    pub sma50: Option<f64>,
    pub sma200: Option<f64>,
    pub rsi14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    #[serde(default)]
    pub macd_histogram: Option<f64>,
}

/// Market state of one asset at fetch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub symbol: String,
    pub current_price: f64,
    pub price_change_24h_pct: f64,
    pub volume_24h: f64,
    pub market_cap: f64,
    pub prices: PriceSeries,
    pub indicators: Indicators,
    pub fetched_at: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Number of history points backing the indicators
    pub fn history_len(&self) -> usize {
        self.prices.len()
    }
}

/// Render an optional indicator for display, `N/A` when absent.
pub fn format_indicator(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", decimals, v),
        None => "N/A".to_string(),
    }
}
