use advisory_client::{
    AnalysisOutcome, AnalysisSnapshotStore, CachedAnalysis, RetryingAnalysisClient,
};
use analysis_core::{format_indicator, CancelSignal, MarketSnapshot};
use anyhow::{Context, Result};
use market_cache::{MarketDataCache, RefreshReport};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DigestSummary {
    pub produced: usize,
    /// Already analysed today
    pub skipped: usize,
    /// No market data for the holding
    pub unavailable: usize,
    /// Analysis call returned no usable text
    pub empty: usize,
    pub cancelled: bool,
}

/// Produces one analysis per holding per day and records it in the snapshot file.
pub struct DigestRunner {
    cache: Arc<MarketDataCache>,
    client: Arc<RetryingAnalysisClient>,
    store: AnalysisSnapshotStore,
    ttl: Duration,
}

impl DigestRunner {
    pub fn new(
        cache: Arc<MarketDataCache>,
        client: Arc<RetryingAnalysisClient>,
        store: AnalysisSnapshotStore,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            client,
            store,
            ttl,
        }
    }

    pub async fn run(&self, holdings: &[String], cancel: &CancelSignal) -> Result<DigestSummary> {
        let mut snapshot = self
            .store
            .load()
            .await
            .with_context(|| format!("Failed to load {}", self.store.path().display()))?;
        let mut summary = DigestSummary::default();

        for symbol in holdings {
            if snapshot.contains_key(symbol) {
                tracing::debug!("{} already analysed today", symbol);
                summary.skipped += 1;
                continue;
            }

            let market = match self.cache.get_with_cancel(symbol, self.ttl, cancel).await {
                Ok(market) => market,
                Err(e) if e.is_cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!("No market data for {}: {}", symbol, e);
                    summary.unavailable += 1;
                    continue;
                }
            };

            let prompt = build_prompt(symbol, &market);
            let outcome = self.client.call_detailed(&prompt, cancel).await;
            match &outcome {
                AnalysisOutcome::Cancelled => {
                    summary.cancelled = true;
                    break;
                }
                AnalysisOutcome::Text(_) => summary.produced += 1,
                AnalysisOutcome::EmptyUpstream | AnalysisOutcome::RetriesExhausted { .. } => {
                    summary.empty += 1;
                }
            }

            let analysis = parse_analysis(&outcome.into_text());
            snapshot.insert(symbol.clone(), CachedAnalysis::new(analysis));
        }

        if summary.produced + summary.empty > 0 {
            self.store
                .save(&snapshot)
                .await
                .with_context(|| format!("Failed to save {}", self.store.path().display()))?;
        }

        tracing::info!(
            "Daily digest: {} produced, {} empty, {} skipped, {} unavailable",
            summary.produced,
            summary.empty,
            summary.skipped,
            summary.unavailable
        );
        Ok(summary)
    }

    /// Run a digest after every scheduler report until `cancel` fires.
    ///
    /// Cancellation also interrupts a digest that is in progress.
    pub async fn run_on_reports(
        &self,
        mut reports: mpsc::UnboundedReceiver<RefreshReport>,
        holdings: &[String],
        cancel: &CancelSignal,
    ) {
        loop {
            let report = tokio::select! {
                report = reports.recv() => report,
                _ = cancel.cancelled() => break,
            };

            let Some(report) = report else {
                tracing::warn!("Scheduler report channel closed, waiting for shutdown");
                cancel.cancelled().await;
                break;
            };

            tracing::info!(
                "Daily refresh finished: {} ok, {} failed",
                report.success_count(),
                report.failure_count()
            );
            match self.run(holdings, cancel).await {
                Ok(summary) if summary.cancelled => {
                    tracing::info!("Daily digest interrupted by shutdown");
                    break;
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Daily digest failed: {:#}", e),
            }
        }
    }
}

pub fn build_prompt(symbol: &str, market: &MarketSnapshot) -> String {
    let ind = &market.indicators;
    format!(
        "Analyze {symbol} for a long-term holder. Respond only with a JSON object \
         with fields \"signal\" (buy, hold or sell), \"confidence\" (0 to 1) and \"summary\".\n\
         \n\
         Price: ${price:.2}\n\
         24h change: {change:.2}%\n\
         24h volume: ${volume:.0}\n\
         Market cap: ${cap:.0}\n\
         SMA20: {sma20}\n\
         SMA50: {sma50}\n\
         SMA200: {sma200}\n\
         RSI14: {rsi}\n\
         MACD: {macd} (signal {signal}, histogram {hist})\n\
         History: {days} daily closes",
        symbol = symbol,
        price = market.current_price,
        change = market.price_change_24h_pct,
        volume = market.volume_24h,
        cap = market.market_cap,
        sma20 = format_indicator(ind.sma20, 2),
        sma50 = format_indicator(ind.sma50, 2),
        sma200 = format_indicator(ind.sma200, 2),
        rsi = format_indicator(ind.rsi14, 1),
        macd = format_indicator(ind.macd, 4),
        signal = format_indicator(ind.macd_signal, 4),
        hist = format_indicator(ind.macd_histogram, 4),
        days = market.history_len(),
    )
}

/// Parse model output as a JSON object, falling back to `{}`.
///
/// Markdown code fences around the object are tolerated.
pub fn parse_analysis(text: &str) -> Value {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    match serde_json::from_str::<Value>(body.trim()) {
        Ok(value) if value.is_object() => value,
        _ => json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use advisory_client::{
        AdvisoryError, AdvisoryResult, AnalysisEndpoint, GenerateContentResponse, RetryLadder,
    };
    use analysis_core::{Indicators, MarketDataError, MarketDataSource, MarketResult};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StaticSource;

    #[async_trait]
    impl MarketDataSource for StaticSource {
        async fn fetch(&self, symbol_or_id: &str) -> MarketResult<MarketSnapshot> {
            if symbol_or_id == "NOPE" {
                return Err(MarketDataError::UpstreamUnavailable(symbol_or_id.to_string()));
            }
            Ok(market(symbol_or_id))
        }

        fn source_name(&self) -> &'static str {
            "static"
        }
    }

    struct CountingEndpoint {
        reply: Option<&'static str>,
        calls: AtomicU32,
        latency: Duration,
    }

    #[async_trait]
    impl AnalysisEndpoint for CountingEndpoint {
        fn name(&self) -> &str {
            "counting"
        }

        async fn generate(&self, _prompt: &str) -> AdvisoryResult<GenerateContentResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            match self.reply {
                Some(text) => Ok(GenerateContentResponse::from_text(text)),
                None => Err(AdvisoryError::InvalidResponse("down".into())),
            }
        }
    }

    fn market(symbol: &str) -> MarketSnapshot {
        MarketSnapshot {
            symbol: symbol.to_string(),
            current_price: 65000.5,
            price_change_24h_pct: 2.1,
            volume_24h: 3.2e10,
            market_cap: 1.2e12,
            prices: vec![1.0; 30],
            indicators: Indicators {
                sma20: Some(64000.0),
                rsi14: Some(55.31),
                ..Indicators::default()
            },
            fetched_at: Utc::now(),
        }
    }

    fn temp_store(name: &str) -> AnalysisSnapshotStore {
        let dir: PathBuf = std::env::temp_dir().join(format!("advisor-digest-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.json", name));
        let _ = std::fs::remove_file(&path);
        AnalysisSnapshotStore::new(path)
    }

    fn runner(name: &str, reply: Option<&'static str>) -> (DigestRunner, Arc<CountingEndpoint>) {
        slow_runner(name, reply, Duration::ZERO)
    }

    fn slow_runner(
        name: &str,
        reply: Option<&'static str>,
        latency: Duration,
    ) -> (DigestRunner, Arc<CountingEndpoint>) {
        let endpoint = Arc::new(CountingEndpoint {
            reply,
            calls: AtomicU32::new(0),
            latency,
        });
        let client = RetryingAnalysisClient::new(
            endpoint.clone(),
            endpoint.clone(),
            RetryLadder::standard(Duration::from_millis(10)),
        );
        let cache = MarketDataCache::new(Arc::new(StaticSource));
        let runner = DigestRunner::new(
            Arc::new(cache),
            Arc::new(client),
            temp_store(name),
            Duration::from_secs(3600),
        );
        (runner, endpoint)
    }

    #[test]
    fn test_prompt_renders_absent_indicators_as_na() {
        let prompt = build_prompt("BTC", &market("BTC"));
        assert!(prompt.contains("Analyze BTC"));
        assert!(prompt.contains("Price: $65000.50"));
        assert!(prompt.contains("SMA20: 64000.00"));
        assert!(prompt.contains("SMA200: N/A"));
        assert!(prompt.contains("RSI14: 55.3"));
        assert!(prompt.contains("MACD: N/A (signal N/A, histogram N/A)"));
        assert!(prompt.contains("History: 30 daily closes"));
    }

    #[test]
    fn test_parse_analysis() {
        assert_eq!(parse_analysis(r#"{"signal":"buy"}"#), json!({"signal": "buy"}));
        assert_eq!(
            parse_analysis("```json\n{\"signal\":\"hold\"}\n```"),
            json!({"signal": "hold"})
        );
        assert_eq!(parse_analysis("{}"), json!({}));
        assert_eq!(parse_analysis("not json"), json!({}));
        assert_eq!(parse_analysis("[1, 2]"), json!({}));
    }

    #[tokio::test]
    async fn test_digest_produces_and_skips_on_rerun() {
        let (runner, endpoint) = runner("rerun", Some(r#"{"signal":"hold","confidence":0.7}"#));
        let holdings = vec!["BTC".to_string(), "ETH".to_string(), "NOPE".to_string()];

        let first = runner.run(&holdings, &CancelSignal::never()).await.unwrap();
        assert_eq!(first.produced, 2);
        assert_eq!(first.unavailable, 1);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);

        let saved = runner.store.load().await.unwrap();
        assert_eq!(saved["BTC"].summary, json!({"signal": "hold", "confidence": 0.7}));

        let second = runner.run(&holdings, &CancelSignal::never()).await.unwrap();
        assert_eq!(second.produced, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_digest_records_empty_analysis_when_upstream_down() {
        let (runner, endpoint) = runner("down", None);

        let summary = runner
            .run(&["SOL".to_string()], &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(summary.empty, 1);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 3);

        let saved = runner.store.load().await.unwrap();
        assert_eq!(saved["SOL"].summary, json!({}));
    }

    #[tokio::test]
    async fn test_digest_stops_when_cancelled() {
        let (runner, endpoint) = runner("cancelled", Some("{}"));
        let (handle, signal) = CancelSignal::pair();
        handle.cancel();

        let summary = runner.run(&["BTC".to_string()], &signal).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_report_loop_runs_digest_per_report() {
        let (runner, endpoint) = runner("reports", Some(r#"{"signal":"buy"}"#));
        let runner = Arc::new(runner);
        let (tx, rx) = mpsc::unbounded_channel();
        let (handle, signal) = CancelSignal::pair();

        let task = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move {
                runner
                    .run_on_reports(rx, &["BTC".to_string()], &signal)
                    .await
            }
        });

        tx.send(RefreshReport::default()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !runner.store.path().exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("digest never saved");

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("report loop did not stop")
            .unwrap();
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_digest_in_progress() {
        let (runner, endpoint) = slow_runner("interrupted", Some("{}"), Duration::from_secs(60));
        let runner = Arc::new(runner);
        let (tx, rx) = mpsc::unbounded_channel();
        let (handle, signal) = CancelSignal::pair();

        let task = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move {
                runner
                    .run_on_reports(rx, &["BTC".to_string(), "ETH".to_string()], &signal)
                    .await
            }
        });

        tx.send(RefreshReport::default()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while endpoint.calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("analysis call never started");

        // Shutdown arrives while the first analysis call is still in flight
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("digest kept running after shutdown")
            .unwrap();

        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
        assert!(!runner.store.path().exists());
    }
}
