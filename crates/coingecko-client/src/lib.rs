use analysis_core::{MarketDataError, MarketDataSource, MarketResult, MarketSnapshot, PriceSeries};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use technical_analysis::IndicatorEngine;

pub mod symbols;

pub use symbols::{is_known_id, resolve_asset_id, symbol_for_id};

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

#[derive(Debug, Clone)]
pub struct CoinGeckoConfig {
    pub base_url: String,
    /// Optional demo key, sent as `x-cg-demo-api-key`
    pub api_key: Option<String>,
    pub timeout: Duration,
    /// Fixed pause between the spot and history calls of one fetch
    pub courtesy_delay: Duration,
    pub history_days: u32,
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(20),
            courtesy_delay: Duration::from_secs(1),
            history_days: 200,
        }
    }
}

/// Spot quote for one asset in USD
#[derive(Debug, Clone, PartialEq)]
pub struct SpotPrice {
    pub price: f64,
    pub change_24h_pct: f64,
    pub volume_24h: f64,
    pub market_cap: f64,
}

#[derive(Clone)]
pub struct CoinGeckoClient {
    config: CoinGeckoConfig,
    client: Client,
    engine: IndicatorEngine,
}

impl CoinGeckoClient {
    pub fn new(config: CoinGeckoConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build CoinGecko HTTP client, using defaults without timeout: {}", e);
                Client::new()
            });

        Self {
            config,
            client,
            engine: IndicatorEngine::new(),
        }
    }

    pub fn with_engine(mut self, engine: IndicatorEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn config(&self) -> &CoinGeckoConfig {
        &self.config
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> MarketResult<Value> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let mut request = self.client.get(&url).query(query);
        if let Some(key) = &self.config.api_key {
            request = request.header("x-cg-demo-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MarketDataError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MarketDataError::Http(format!(
                "HTTP {}: {}",
                status,
                response.text().await.unwrap_or_default()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| MarketDataError::Http(e.to_string()))
    }

    /// Get the USD spot price, 24h change, 24h volume and market cap for a CoinGecko id
    pub async fn get_spot_price(&self, id: &str) -> MarketResult<SpotPrice> {
        let body = self
            .get_json(
                "/simple/price",
                &[
                    ("ids", id.to_string()),
                    ("vs_currencies", "usd".to_string()),
                    ("include_24hr_change", "true".to_string()),
                    ("include_24hr_vol", "true".to_string()),
                    ("include_market_cap", "true".to_string()),
                ],
            )
            .await?;

        parse_spot_price(id, &body)
    }

    /// Get daily closing prices for the trailing `days`, oldest first
    pub async fn get_price_history(&self, id: &str, days: u32) -> MarketResult<PriceSeries> {
        let body = self
            .get_json(
                &format!("/coins/{}/market_chart", id),
                &[
                    ("vs_currency", "usd".to_string()),
                    ("days", days.to_string()),
                    ("interval", "daily".to_string()),
                ],
            )
            .await?;

        parse_price_history(id, &body)
    }

    /// Spot price, then (after the courtesy delay) history, then indicators.
    pub async fn fetch_snapshot(&self, symbol_or_id: &str) -> MarketResult<MarketSnapshot> {
        let id = resolve_asset_id(symbol_or_id);

        let spot = self.get_spot_price(&id).await?;

        tokio::time::sleep(self.config.courtesy_delay).await;

        let prices = self.get_price_history(&id, self.config.history_days).await?;
        let indicators = self.engine.compute(&prices);

        let symbol = symbol_for_id(&id)
            .map(str::to_string)
            .unwrap_or_else(|| symbol_or_id.trim().to_uppercase());

        tracing::info!(
            "Fetched {} ({}): ${} with {} daily prices",
            symbol,
            id,
            spot.price,
            prices.len()
        );

        Ok(MarketSnapshot {
            symbol,
            current_price: spot.price,
            price_change_24h_pct: spot.change_24h_pct,
            volume_24h: spot.volume_24h,
            market_cap: spot.market_cap,
            prices,
            indicators,
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl MarketDataSource for CoinGeckoClient {
    async fn fetch(&self, symbol_or_id: &str) -> MarketResult<MarketSnapshot> {
        self.fetch_snapshot(symbol_or_id).await
    }

    fn canonical_id(&self, symbol_or_id: &str) -> String {
        resolve_asset_id(symbol_or_id)
    }

    fn source_name(&self) -> &'static str {
        "coingecko"
    }
}

fn parse_spot_price(id: &str, body: &Value) -> MarketResult<SpotPrice> {
    let entry = body
        .get(id)
        .ok_or_else(|| MarketDataError::UpstreamUnavailable(id.to_string()))?;

    let price = entry
        .get("usd")
        .and_then(Value::as_f64)
        .ok_or_else(|| MarketDataError::UpstreamUnavailable(id.to_string()))?;

    let optional = |field: &str| entry.get(field).and_then(Value::as_f64).unwrap_or(0.0);

    Ok(SpotPrice {
        price,
        change_24h_pct: optional("usd_24h_change"),
        volume_24h: optional("usd_24h_vol"),
        market_cap: optional("usd_market_cap"),
    })
}

fn parse_price_history(id: &str, body: &Value) -> MarketResult<PriceSeries> {
    let points = body
        .get("prices")
        .and_then(Value::as_array)
        .ok_or_else(|| MarketDataError::NoHistoricalData(id.to_string()))?;

    // Each point is [timestamp_ms, price]
    Ok(points
        .iter()
        .filter_map(|point| point.get(1).and_then(Value::as_f64))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP/1.1 responder: first route whose prefix matches the request
    /// target wins, anything else gets a 404. Returns the base URL and a log of
    /// raw request heads.
    async fn serve_stub(routes: Vec<(String, u16, String)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requests);
        let routes = Arc::new(routes);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let log = Arc::clone(&log);
                let routes = Arc::clone(&routes);
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 4096];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&head).to_string();
                    let target = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                    log.lock().unwrap().push(head);

                    let (status, body) = routes
                        .iter()
                        .find(|(prefix, _, _)| target.starts_with(prefix.as_str()))
                        .map(|(_, status, body)| (*status, body.clone()))
                        .unwrap_or((404, "{}".to_string()));

                    let response = format!(
                        "HTTP/1.1 {} STUB\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{}", addr), requests)
    }

    fn history_body(len: usize) -> String {
        let prices: Vec<Value> = (0..len)
            .map(|i| json!([1_700_000_000_000i64 + i as i64 * 86_400_000, 50_000.0 + i as f64 * 75.0]))
            .collect();
        json!({ "prices": prices, "market_caps": [], "total_volumes": [] }).to_string()
    }

    fn test_client(base_url: String) -> CoinGeckoClient {
        CoinGeckoClient::new(CoinGeckoConfig {
            base_url,
            api_key: Some("demo-key".to_string()),
            timeout: Duration::from_secs(5),
            courtesy_delay: Duration::from_millis(10),
            history_days: 200,
        })
    }

    #[test]
    fn test_parse_spot_price_defaults_optional_fields() {
        let body = json!({ "bitcoin": { "usd": 100.0, "usd_24h_change": null } });
        let spot = parse_spot_price("bitcoin", &body).unwrap();
        assert_eq!(spot.price, 100.0);
        assert_eq!(spot.change_24h_pct, 0.0);
        assert_eq!(spot.volume_24h, 0.0);
        assert_eq!(spot.market_cap, 0.0);
    }

    #[test]
    fn test_parse_spot_price_missing_asset() {
        let body = json!({});
        assert!(matches!(
            parse_spot_price("bitcoin", &body),
            Err(MarketDataError::UpstreamUnavailable(id)) if id == "bitcoin"
        ));

        let no_usd = json!({ "bitcoin": { "eur": 1.0 } });
        assert!(matches!(
            parse_spot_price("bitcoin", &no_usd),
            Err(MarketDataError::UpstreamUnavailable(_))
        ));
    }

    #[test]
    fn test_parse_history_keeps_order_and_prices_only() {
        let body = json!({ "prices": [[1, 10.0], [2, 11.5], [3, 9.25]] });
        assert_eq!(parse_price_history("x", &body).unwrap(), vec![10.0, 11.5, 9.25]);
    }

    #[test]
    fn test_parse_history_missing_array() {
        let body = json!({ "market_caps": [] });
        assert!(matches!(
            parse_price_history("x", &body),
            Err(MarketDataError::NoHistoricalData(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_snapshot_end_to_end() {
        let (base_url, requests) = serve_stub(vec![
            (
                "/simple/price?ids=bitcoin&".to_string(),
                200,
                r#"{"bitcoin":{"usd":65000.5,"usd_24h_change":2.1,"usd_24h_vol":3.2e10}}"#.to_string(),
            ),
            (
                "/coins/bitcoin/market_chart?vs_currency=usd&days=200&interval=daily".to_string(),
                200,
                history_body(200),
            ),
        ])
        .await;

        let client = test_client(base_url);
        let snapshot = client.fetch("BTC").await.unwrap();

        assert_eq!(snapshot.symbol, "BTC");
        assert_eq!(snapshot.current_price, 65000.5);
        assert_eq!(snapshot.price_change_24h_pct, 2.1);
        assert_eq!(snapshot.volume_24h, 3.2e10);
        assert_eq!(snapshot.market_cap, 0.0);
        assert_eq!(snapshot.prices.len(), 200);
        assert_eq!(snapshot.prices[0], 50_000.0);
        assert!(snapshot.indicators.sma20.is_some());
        assert!(snapshot.indicators.sma50.is_some());
        assert!(snapshot.indicators.sma200.is_some());
        assert!(snapshot.indicators.rsi14.is_some());
        assert_eq!(snapshot.indicators.macd, snapshot.indicators.macd_signal);

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with("GET /simple/price"));
        assert!(requests[0].to_lowercase().contains("x-cg-demo-api-key: demo-key"));
        assert!(requests[1].starts_with("GET /coins/bitcoin/market_chart"));
    }

    #[tokio::test]
    async fn test_fetch_missing_asset_is_upstream_unavailable() {
        let (base_url, requests) = serve_stub(vec![("/simple/price".to_string(), 200, "{}".to_string())]).await;

        let err = test_client(base_url).fetch("ETH").await.unwrap_err();
        assert!(matches!(err, MarketDataError::UpstreamUnavailable(id) if id == "ethereum"));
        // History is never requested after a failed spot call
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_missing_history_is_no_historical_data() {
        let (base_url, _) = serve_stub(vec![
            ("/simple/price".to_string(), 200, r#"{"solana":{"usd":150.0}}"#.to_string()),
            ("/coins/solana/market_chart".to_string(), 200, r#"{"total_volumes":[]}"#.to_string()),
        ])
        .await;

        let err = test_client(base_url).fetch("SOL").await.unwrap_err();
        assert!(matches!(err, MarketDataError::NoHistoricalData(id) if id == "solana"));
    }

    #[tokio::test]
    async fn test_fetch_http_error_status() {
        let (base_url, _) = serve_stub(vec![(
            "/simple/price".to_string(),
            429,
            r#"{"status":{"error_code":429}}"#.to_string(),
        )])
        .await;

        let err = test_client(base_url).fetch("BTC").await.unwrap_err();
        match err {
            MarketDataError::Http(msg) => assert!(msg.contains("429")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_canonical_id_uses_symbol_table() {
        let client = CoinGeckoClient::new(CoinGeckoConfig::default());
        assert_eq!(client.canonical_id("BTC"), "bitcoin");
        assert_eq!(client.canonical_id("bitcoin"), "bitcoin");
        assert_eq!(client.source_name(), "coingecko");
    }

    #[tokio::test]
    async fn test_request_times_out_on_silent_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let client = CoinGeckoClient::new(CoinGeckoConfig {
            base_url: format!("http://{}", addr),
            timeout: Duration::from_millis(200),
            ..CoinGeckoConfig::default()
        });

        let start = std::time::Instant::now();
        assert!(client.get_spot_price("bitcoin").await.is_err());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
