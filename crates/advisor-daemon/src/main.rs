use std::sync::Arc;

use advisory_client::{AnalysisSnapshotStore, RetryingAnalysisClient};
use analysis_core::CancelSignal;
use anyhow::Result;
use coingecko_client::CoinGeckoClient;
use market_cache::{CacheScheduler, MarketDataCache};
use technical_analysis::IndicatorEngine;
use tokio::signal::unix::SignalKind;

mod config;
mod digest;

use config::AdvisorConfig;
use digest::DigestRunner;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting crypto advisor daemon");

    // 2. Configuration
    let config = AdvisorConfig::from_env()?;
    tracing::info!("Configuration loaded");
    tracing::info!("  Holdings: {}", config.scheduler.holdings.join(", "));
    tracing::info!(
        "  Daily refresh: {} {}",
        config.scheduler.daily_refresh_at.format("%H:%M"),
        config.scheduler.timezone.name()
    );
    tracing::info!("  Cache TTL: {}s", config.cache_ttl.as_secs());
    tracing::info!("  MACD signal mode: {}", config.macd_mode);
    tracing::info!("  Snapshot file: {}", config.snapshot_path.display());

    // 3. Components
    let fetcher = CoinGeckoClient::new(config.coingecko.clone())
        .with_engine(IndicatorEngine::with_macd_mode(config.macd_mode));
    let cache = Arc::new(
        MarketDataCache::new(Arc::new(fetcher)).with_refresh_delay(config.refresh_delay),
    );
    tracing::info!("Market data cache ready ({})", cache.source_name());

    let client = Arc::new(RetryingAnalysisClient::from_config(&config.analysis));
    let digest = DigestRunner::new(
        Arc::clone(&cache),
        client,
        AnalysisSnapshotStore::new(config.snapshot_path.clone()),
        config.cache_ttl,
    );

    // 4. Shutdown listener
    let (cancel_handle, cancel) = CancelSignal::pair();
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
        cancel_handle.cancel();
    });

    // 5. Warm the cache so the first reads are hits
    let warm = cache
        .refresh_all_with_cancel(&config.scheduler.holdings, &cancel)
        .await;
    tracing::info!(
        "Cache warmed: {} ok, {} failed",
        warm.success_count(),
        warm.failure_count()
    );
    for (key, error) in &warm.failed {
        tracing::warn!("Warm-up failed for {}: {}", key, error);
    }

    // 6. Background refresh and cleanup, digest after each daily refresh
    let (scheduler, reports) =
        CacheScheduler::spawn(Arc::clone(&cache), config.scheduler.clone(), cancel.clone());
    digest
        .run_on_reports(reports, &config.scheduler.holdings, &cancel)
        .await;

    // 7. Shutdown
    scheduler.join().await;
    tracing::info!("Advisor daemon stopped ({} cached entries)", cache.len());

    Ok(())
}
