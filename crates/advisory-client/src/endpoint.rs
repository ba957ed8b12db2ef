use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AdvisoryError, AdvisoryResult};

/// A generative endpoint that turns a prompt into a candidate response
#[async_trait]
pub trait AnalysisEndpoint: Send + Sync {
    /// Short label used in logs and attempt records
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> AdvisoryResult<GenerateContentResponse>;
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsePart {
    #[serde(default)]
    pub text: Option<String>,
}

impl GenerateContentResponse {
    /// Response carrying a single text part
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            candidates: vec![Candidate {
                content: Some(CandidateContent {
                    parts: vec![ResponsePart {
                        text: Some(text.into()),
                    }],
                }),
            }],
        }
    }

    /// `candidates[0].content.parts[0].text`, if present
    pub fn first_text(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .first()?
            .text
            .as_deref()
    }
}

/// Gemini `generateContent` endpoint for one model
pub struct GeminiEndpoint {
    client: Client,
    name: String,
    url: String,
    api_key: String,
}

impl GeminiEndpoint {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build analysis HTTP client, using defaults without timeout: {}", e);
                Client::new()
            });

        Self {
            client,
            name: name.into(),
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AnalysisEndpoint for GeminiEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> AdvisoryResult<GenerateContentResponse> {
        let request = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdvisoryError::Status { status, body });
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| AdvisoryError::InvalidResponse(format!("{}: {}", self.name, e)))
    }
}
