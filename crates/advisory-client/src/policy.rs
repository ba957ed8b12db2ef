//! Declarative retry ladder.
//!
//! A ladder is a list of steps, each naming an endpoint slot, how many
//! attempts to make against it, and the pause after a failed attempt. The
//! pause is skipped after the last attempt of the whole ladder.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSlot {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryStep {
    pub endpoint: EndpointSlot,
    pub attempts: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryLadder {
    steps: Vec<RetryStep>,
}

impl RetryLadder {
    pub fn new(steps: Vec<RetryStep>) -> Self {
        Self { steps }
    }

    /// Two attempts on the primary endpoint, then one on the fallback.
    pub fn standard(delay: Duration) -> Self {
        Self::new(vec![
            RetryStep {
                endpoint: EndpointSlot::Primary,
                attempts: 2,
                delay,
            },
            RetryStep {
                endpoint: EndpointSlot::Fallback,
                attempts: 1,
                delay,
            },
        ])
    }

    pub fn steps(&self) -> &[RetryStep] {
        &self.steps
    }

    pub fn total_attempts(&self) -> u32 {
        self.steps.iter().map(|s| s.attempts).sum()
    }

    /// Flattened attempt plan: the slot for each attempt and the pause that
    /// follows it on failure.
    pub fn schedule(&self) -> Vec<(EndpointSlot, Duration)> {
        self.steps
            .iter()
            .flat_map(|step| (0..step.attempts).map(move |_| (step.endpoint, step.delay)))
            .collect()
    }
}

impl Default for RetryLadder {
    fn default() -> Self {
        Self::standard(Duration::from_secs(1))
    }
}
