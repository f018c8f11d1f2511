//! Token usage extraction, pricing and per-request usage records.

pub mod cost;
pub mod extractor;
pub mod recorder;

pub use cost::calculate_cost;
pub use extractor::{extract_non_streaming, scan_stream_usage, StreamUsageScanner};
pub use recorder::{RequestContext, UsageRecorder};

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizedUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_token_latency_ms: Option<u64>,
}

impl NormalizedUsage {
    /// `total` is taken as reported; when absent it is the sum.
    pub fn new(prompt_tokens: u64, completion_tokens: u64, total: Option<u64>) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: total.unwrap_or(prompt_tokens + completion_tokens),
            first_token_latency_ms: None,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn with_first_token_latency(mut self, latency_ms: Option<u64>) -> Self {
        self.first_token_latency_ms = latency_ms;
        self
    }
}
