use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarketDataError {
    /// The provider answered but carried no usable entry for the requested id.
    #[error("Upstream unavailable: no market data for {0}")]
    UpstreamUnavailable(String),

    #[error("No historical data for {0}")]
    NoHistoricalData(String),

    /// A cache miss whose fetch failed. `source` is the fetcher's own error.
    #[error("Fetch failed for {key}: {source}")]
    FetchFailed {
        key: String,
        #[source]
        source: Box<MarketDataError>,
    },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl MarketDataError {
    pub fn fetch_failed(key: impl Into<String>, source: MarketDataError) -> Self {
        match source {
            // Cancellation is never reported as a fetch failure.
            MarketDataError::Cancelled => MarketDataError::Cancelled,
            other => MarketDataError::FetchFailed {
                key: key.into(),
                source: Box::new(other),
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MarketDataError::Cancelled)
    }
}

pub type MarketResult<T> = Result<T, MarketDataError>;
