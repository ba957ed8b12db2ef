use analysis_core::Indicators;
use serde::{Deserialize, Serialize};

use crate::indicators::*;

/// Windows used when deriving [`Indicators`] from a price series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub sma_short: usize,
    pub sma_medium: usize,
    pub sma_long: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    #[serde(default)]
    pub macd_signal_mode: MacdSignalMode,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            sma_short: 20,
            sma_medium: 50,
            sma_long: 200,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            macd_signal_mode: MacdSignalMode::Legacy,
        }
    }
}

/// Stateless indicator calculator. Cheap to clone and safe to share.
#[derive(Debug, Clone, Default)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: IndicatorConfig) -> Self {
        Self { config }
    }

    pub fn with_macd_mode(mode: MacdSignalMode) -> Self {
        Self::with_config(IndicatorConfig {
            macd_signal_mode: mode,
            ..IndicatorConfig::default()
        })
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Compute every indicator the series is long enough for.
    pub fn compute(&self, prices: &[f64]) -> Indicators {
        let cfg = &self.config;
        let macd_result = macd_with_mode(
            prices,
            cfg.macd_fast,
            cfg.macd_slow,
            cfg.macd_signal,
            cfg.macd_signal_mode,
        );

        let indicators = Indicators {
            sma20: sma(prices, cfg.sma_short),
            sma50: sma(prices, cfg.sma_medium),
            sma200: sma(prices, cfg.sma_long),
            rsi14: rsi(prices, cfg.rsi_period),
            macd: macd_result.map(|m| m.macd),
            macd_signal: macd_result.map(|m| m.signal),
            macd_histogram: macd_result.map(|m| m.histogram),
        };

        tracing::debug!(
            "Computed indicators over {} prices (macd mode: {})",
            prices.len(),
            cfg.macd_signal_mode
        );

        indicators
    }
}
