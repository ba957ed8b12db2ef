//! Background refresh and cleanup tasks.
//!
//! Both tasks only use the public [`MarketDataCache`] operations and stop when
//! the shared [`CancelSignal`] fires.

use analysis_core::CancelSignal;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::{MarketDataCache, RefreshReport};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Keys refreshed by the daily batch, in order
    pub holdings: Vec<String>,
    /// Local wall-clock time of the daily batch
    pub daily_refresh_at: NaiveTime,
    pub timezone: Tz,
    pub cleanup_interval: Duration,
    /// Entries older than this are removed by the cleanup sweep
    pub cleanup_ttl: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            holdings: Vec::new(),
            daily_refresh_at: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            timezone: chrono_tz::UTC,
            cleanup_interval: Duration::from_secs(6 * 60 * 60),
            cleanup_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Handles to the running background tasks
pub struct CacheScheduler {
    handles: Vec<JoinHandle<()>>,
}

impl CacheScheduler {
    /// Start the daily refresh and the periodic cleanup.
    ///
    /// Each completed daily batch is also sent on the returned channel.
    pub fn spawn(
        cache: Arc<MarketDataCache>,
        config: SchedulerConfig,
        cancel: CancelSignal,
    ) -> (Self, mpsc::UnboundedReceiver<RefreshReport>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let daily = tokio::spawn(run_daily_refresh(
            Arc::clone(&cache),
            config.clone(),
            cancel.clone(),
            tx,
        ));
        let cleanup = tokio::spawn(run_cleanup(cache, config, cancel));

        (
            Self {
                handles: vec![daily, cleanup],
            },
            rx,
        )
    }

    /// Wait for both tasks to exit (after cancellation).
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Scheduler task ended abnormally: {}", e);
            }
        }
    }
}

async fn run_daily_refresh(
    cache: Arc<MarketDataCache>,
    config: SchedulerConfig,
    cancel: CancelSignal,
    reports: mpsc::UnboundedSender<RefreshReport>,
) {
    loop {
        let now = Utc::now().with_timezone(&config.timezone);
        let wait = duration_until_next(now, config.daily_refresh_at);
        tracing::info!(
            "Next daily refresh of {} holdings at {} {} (in {:.1}h)",
            config.holdings.len(),
            config.daily_refresh_at.format("%H:%M"),
            config.timezone.name(),
            wait.as_secs_f64() / 3600.0
        );

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel.cancelled() => break,
        }

        let report = cache.refresh_all_with_cancel(&config.holdings, &cancel).await;
        if report.cancelled {
            break;
        }
        for (key, error) in &report.failed {
            tracing::warn!("Daily refresh failed for {}: {}", key, error);
        }
        if reports.send(report).is_err() {
            tracing::debug!("No listener for daily refresh reports");
        }
    }

    tracing::info!("Daily refresh task stopped");
}

async fn run_cleanup(cache: Arc<MarketDataCache>, config: SchedulerConfig, cancel: CancelSignal) {
    let start = tokio::time::Instant::now() + config.cleanup_interval;
    let mut interval = tokio::time::interval_at(start, config.cleanup_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                cache.cleanup_expired(config.cleanup_ttl);
            }
            _ = cancel.cancelled() => break,
        }
    }

    tracing::info!("Cache cleanup task stopped");
}

/// Time from `now` until the next occurrence of `at` in `now`'s timezone.
///
/// If `at` falls in a DST gap on a given day, the first valid instant after it is used.
pub fn duration_until_next<Tz2: TimeZone>(now: DateTime<Tz2>, at: NaiveTime) -> Duration {
    let tz = now.timezone();
    let mut day = now.date_naive();

    for _ in 0..3 {
        let mut naive = day.and_time(at);
        let mut candidate = tz.from_local_datetime(&naive).earliest();
        // Skip forward through a DST gap
        let mut steps = 0;
        while candidate.is_none() && steps < 4 {
            naive += ChronoDuration::minutes(30);
            candidate = tz.from_local_datetime(&naive).earliest();
            steps += 1;
        }

        if let Some(candidate) = candidate {
            if candidate > now {
                return (candidate - now.clone()).to_std().unwrap_or(Duration::ZERO);
            }
        }
        day = day.succ_opt().unwrap_or(day);
    }

    Duration::from_secs(24 * 60 * 60)
}
