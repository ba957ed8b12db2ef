use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdvisoryError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: reqwest::StatusCode, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cancelled")]
    Cancelled,
}

const OVERLOAD_MARKERS: &[&str] = &["503", "Service Unavailable", "overloaded", "UNAVAILABLE"];

impl AdvisoryError {
    /// Whether the failure looks like upstream overload.
    ///
    /// Only used to label log lines; overload retries like any other failure.
    pub fn is_overload(&self) -> bool {
        is_overload_message(&self.to_string())
    }
}

pub fn is_overload_message(message: &str) -> bool {
    OVERLOAD_MARKERS.iter().any(|marker| message.contains(marker))
}

pub type AdvisoryResult<T> = Result<T, AdvisoryError>;
