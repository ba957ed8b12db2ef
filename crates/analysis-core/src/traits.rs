use async_trait::async_trait;
use crate::{MarketResult, MarketSnapshot};

/// Source of market snapshots, usually an HTTP market-data provider.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetch a fresh snapshot. Implementations do not retry.
    async fn fetch(&self, symbol_or_id: &str) -> MarketResult<MarketSnapshot>;

    /// Provider-specific key for `symbol_or_id`, so aliases share one cache entry.
    fn canonical_id(&self, symbol_or_id: &str) -> String {
        symbol_or_id.to_string()
    }

    fn source_name(&self) -> &'static str;
}
