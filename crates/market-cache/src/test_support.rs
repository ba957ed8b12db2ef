use analysis_core::{Indicators, MarketDataError, MarketDataSource, MarketResult, MarketSnapshot};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory source that counts fetches per key.
#[derive(Default)]
pub struct FakeSource {
    calls: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    delays: HashMap<String, Duration>,
    version: AtomicU64,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, key: &str, delay: Duration) -> Self {
        self.delays.insert(key.to_string(), delay);
        self
    }

    pub fn fail(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    pub fn recover(&self, key: &str) {
        self.failing.lock().unwrap().remove(key);
    }

    pub fn calls(&self, key: &str) -> usize {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl MarketDataSource for FakeSource {
    async fn fetch(&self, symbol_or_id: &str) -> MarketResult<MarketSnapshot> {
        let key = self.canonical_id(symbol_or_id);
        *self.calls.lock().unwrap().entry(key.clone()).or_insert(0) += 1;

        if let Some(delay) = self.delays.get(&key) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.lock().unwrap().contains(&key) {
            return Err(MarketDataError::UpstreamUnavailable(key));
        }

        // Each successful fetch gets a distinct price so replacements are observable.
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MarketSnapshot {
            symbol: key.to_uppercase(),
            current_price: version as f64,
            price_change_24h_pct: 0.0,
            volume_24h: 0.0,
            market_cap: 0.0,
            prices: vec![version as f64],
            indicators: Indicators::default(),
            fetched_at: Utc::now(),
        })
    }

    /// Treat "btc" and "bitcoin" as the same asset, like the real provider does.
    fn canonical_id(&self, symbol_or_id: &str) -> String {
        match symbol_or_id.to_lowercase().as_str() {
            "btc" => "bitcoin".to_string(),
            other => other.to_string(),
        }
    }

    fn source_name(&self) -> &'static str {
        "fake"
    }
}
