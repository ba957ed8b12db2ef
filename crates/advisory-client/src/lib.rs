//! Analysis generation with a primary/fallback retry ladder.

pub mod client;
pub mod endpoint;
pub mod error;
pub mod policy;
pub mod snapshot;

pub use client::*;
pub use endpoint::*;
pub use error::*;
pub use policy::*;
pub use snapshot::*;

use std::time::Duration;

pub const DEFAULT_PRIMARY_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent";
pub const DEFAULT_FALLBACK_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

#[derive(Debug, Clone)]
pub struct AnalysisClientConfig {
    pub api_key: String,
    pub primary_url: String,
    pub fallback_url: String,
    pub timeout: Duration,
    pub retry_delay: Duration,
}

impl AnalysisClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            primary_url: DEFAULT_PRIMARY_URL.to_string(),
            fallback_url: DEFAULT_FALLBACK_URL.to_string(),
            timeout: Duration::from_secs(20),
            retry_delay: Duration::from_secs(1),
        }
    }
}
