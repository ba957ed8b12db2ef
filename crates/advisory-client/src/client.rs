use analysis_core::CancelSignal;
use std::sync::Arc;
use std::time::Duration;

use crate::endpoint::{AnalysisEndpoint, GeminiEndpoint};
use crate::policy::{EndpointSlot, RetryLadder};
use crate::AnalysisClientConfig;

/// Text returned by [`RetryingAnalysisClient::call`] when no analysis is available
pub const EMPTY_ANALYSIS: &str = "{}";

/// One failed upstream call made while working through the ladder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    pub endpoint: String,
    pub attempt_number: u32,
    /// Error message of the failed call
    pub outcome: String,
    pub overloaded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Text(String),
    /// The provider answered without a candidate text
    EmptyUpstream,
    RetriesExhausted { attempts: Vec<RetryAttempt> },
    Cancelled,
}

impl AnalysisOutcome {
    /// Collapse to the raw text, using `"{}"` for every non-text outcome.
    pub fn into_text(self) -> String {
        match self {
            AnalysisOutcome::Text(text) => text,
            _ => EMPTY_ANALYSIS.to_string(),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, AnalysisOutcome::Text(_))
    }
}

/// Calls a primary and a fallback endpoint following a [`RetryLadder`].
pub struct RetryingAnalysisClient {
    primary: Arc<dyn AnalysisEndpoint>,
    fallback: Arc<dyn AnalysisEndpoint>,
    ladder: RetryLadder,
}

impl RetryingAnalysisClient {
    pub fn new(
        primary: Arc<dyn AnalysisEndpoint>,
        fallback: Arc<dyn AnalysisEndpoint>,
        ladder: RetryLadder,
    ) -> Self {
        Self {
            primary,
            fallback,
            ladder,
        }
    }

    /// Gemini primary/fallback pair with the standard ladder.
    pub fn from_config(config: &AnalysisClientConfig) -> Self {
        let primary = GeminiEndpoint::new(
            "primary",
            config.primary_url.clone(),
            config.api_key.clone(),
            config.timeout,
        );
        let fallback = GeminiEndpoint::new(
            "fallback",
            config.fallback_url.clone(),
            config.api_key.clone(),
            config.timeout,
        );

        Self::new(
            Arc::new(primary),
            Arc::new(fallback),
            RetryLadder::standard(config.retry_delay),
        )
    }

    pub fn ladder(&self) -> &RetryLadder {
        &self.ladder
    }

    /// Raw analysis text, or `"{}"` when none could be produced. Never fails.
    pub async fn call(&self, prompt: &str) -> String {
        self.call_detailed(prompt, &CancelSignal::never())
            .await
            .into_text()
    }

    pub async fn call_detailed(&self, prompt: &str, cancel: &CancelSignal) -> AnalysisOutcome {
        let schedule = self.ladder.schedule();
        let mut attempts = Vec::with_capacity(schedule.len());

        for (index, (slot, delay)) in schedule.iter().enumerate() {
            if cancel.is_cancelled() {
                return AnalysisOutcome::Cancelled;
            }

            let endpoint = self.endpoint(*slot);
            let attempt_number = index as u32 + 1;

            let result = tokio::select! {
                result = endpoint.generate(prompt) => result,
                _ = cancel.cancelled() => return AnalysisOutcome::Cancelled,
            };

            match result {
                Ok(response) => {
                    return match response.first_text() {
                        Some(text) => {
                            if attempt_number > 1 {
                                tracing::info!(
                                    "Analysis succeeded on attempt {} ({})",
                                    attempt_number,
                                    endpoint.name()
                                );
                            }
                            AnalysisOutcome::Text(text.to_string())
                        }
                        None => {
                            tracing::warn!(
                                "Analysis endpoint {} returned no candidate text",
                                endpoint.name()
                            );
                            AnalysisOutcome::EmptyUpstream
                        }
                    };
                }
                Err(e) => {
                    let overloaded = e.is_overload();
                    if overloaded {
                        tracing::warn!(
                            "Analysis endpoint {} overloaded (attempt {}): {}",
                            endpoint.name(),
                            attempt_number,
                            e
                        );
                    } else {
                        tracing::warn!(
                            "Analysis attempt {} on {} failed: {}",
                            attempt_number,
                            endpoint.name(),
                            e
                        );
                    }

                    attempts.push(RetryAttempt {
                        endpoint: endpoint.name().to_string(),
                        attempt_number,
                        outcome: e.to_string(),
                        overloaded,
                    });

                    if index + 1 < schedule.len() && !self.pause(*delay, cancel).await {
                        return AnalysisOutcome::Cancelled;
                    }
                }
            }
        }

        tracing::error!(
            "All {} analysis attempts failed, returning empty analysis",
            attempts.len()
        );
        AnalysisOutcome::RetriesExhausted { attempts }
    }

    fn endpoint(&self, slot: EndpointSlot) -> &Arc<dyn AnalysisEndpoint> {
        match slot {
            EndpointSlot::Primary => &self.primary,
            EndpointSlot::Fallback => &self.fallback,
        }
    }

    /// Returns false if cancelled during the pause.
    async fn pause(&self, delay: Duration, cancel: &CancelSignal) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }
}
