use advisory_client::{AnalysisClientConfig, DEFAULT_FALLBACK_URL, DEFAULT_PRIMARY_URL};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use coingecko_client::{CoinGeckoConfig, DEFAULT_BASE_URL};
use market_cache::SchedulerConfig;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use technical_analysis::MacdSignalMode;

#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    pub coingecko: CoinGeckoConfig,
    pub analysis: AnalysisClientConfig,
    pub scheduler: SchedulerConfig,

    // Cache
    pub cache_ttl: Duration,
    pub refresh_delay: Duration,

    pub macd_mode: MacdSignalMode,
    pub snapshot_path: PathBuf,
}

impl AdvisorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let timeout = Duration::from_secs(parse_or(&var, "HTTP_TIMEOUT_SECS", 20)?);
        let cache_ttl = Duration::from_secs(parse_or(&var, "CACHE_TTL_SECS", 86_400)?);

        let coingecko = CoinGeckoConfig {
            base_url: var("COINGECKO_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: var("COINGECKO_API_KEY").filter(|k| !k.is_empty()),
            timeout,
            courtesy_delay: Duration::from_millis(parse_or(&var, "FETCH_COURTESY_DELAY_MS", 1000)?),
            ..CoinGeckoConfig::default()
        };

        let analysis = AnalysisClientConfig {
            api_key: var("GEMINI_API_KEY")
                .filter(|k| !k.is_empty())
                .context("GEMINI_API_KEY not set")?,
            primary_url: var("GEMINI_PRIMARY_URL").unwrap_or_else(|| DEFAULT_PRIMARY_URL.to_string()),
            fallback_url: var("GEMINI_FALLBACK_URL")
                .unwrap_or_else(|| DEFAULT_FALLBACK_URL.to_string()),
            timeout,
            retry_delay: Duration::from_millis(parse_or(&var, "RETRY_DELAY_MS", 1000)?),
        };

        let holdings: Vec<String> = var("HOLDINGS")
            .unwrap_or_else(|| "BTC,ETH,SOL".to_string())
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        let refresh_time = var("DAILY_REFRESH_TIME").unwrap_or_else(|| "08:00".to_string());
        let daily_refresh_at = NaiveTime::parse_from_str(&refresh_time, "%H:%M")
            .with_context(|| format!("Invalid DAILY_REFRESH_TIME '{}', expected HH:MM", refresh_time))?;

        let timezone_name = var("TIMEZONE").unwrap_or_else(|| "UTC".to_string());
        let timezone: Tz = timezone_name
            .parse()
            .map_err(|e| anyhow!("Invalid TIMEZONE '{}': {}", timezone_name, e))?;

        let scheduler = SchedulerConfig {
            holdings,
            daily_refresh_at,
            timezone,
            cleanup_interval: Duration::from_secs(parse_or(&var, "CLEANUP_INTERVAL_SECS", 21_600)?),
            cleanup_ttl: cache_ttl,
        };

        let config = Self {
            coingecko,
            analysis,
            scheduler,
            cache_ttl,
            refresh_delay: Duration::from_millis(parse_or(&var, "REFRESH_DELAY_MS", 1200)?),
            macd_mode: parse_or(&var, "MACD_SIGNAL_MODE", MacdSignalMode::Legacy)?,
            snapshot_path: var("ANALYSIS_SNAPSHOT_PATH")
                .unwrap_or_else(|| "analysis_cache.json".to_string())
                .into(),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.scheduler.holdings.is_empty() {
            return Err(anyhow!("HOLDINGS must list at least one symbol"));
        }
        if self.cache_ttl.is_zero() {
            return Err(anyhow!("CACHE_TTL_SECS must be greater than 0"));
        }
        if self.scheduler.cleanup_interval.is_zero() {
            return Err(anyhow!("CLEANUP_INTERVAL_SECS must be greater than 0"));
        }
        if self.coingecko.timeout.is_zero() {
            return Err(anyhow!("HTTP_TIMEOUT_SECS must be greater than 0"));
        }
        Ok(())
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match var(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid {} '{}': {}", key, raw, e)),
        _ => Ok(default),
    }
}
