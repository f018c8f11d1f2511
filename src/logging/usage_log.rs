use crate::backends::UsageSink;
use crate::types::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageStatus {
    Success,
    Error,
}

/// One row of the usage ledger, written once per client request.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub token_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub channel_id: Option<String>,
    pub channel_name: Option<String>,
    pub requested_model: String,
    /// Model name actually sent upstream.
    pub model: Option<String>,
    pub path: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_token_latency_ms: Option<u64>,
    pub duration_ms: u64,
    pub cost: f64,
    pub http_status: u16,
    pub status: UsageStatus,
    pub is_stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

/// Writes usage records to the `usage` tracing target as JSON.
#[derive(Debug, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: UsageRecord) -> Result<()> {
        let line = serde_json::to_string(&record)?;
        tracing::info!(target: "usage", record = %line, "Usage recorded");
        Ok(())
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryUsageSink {
    records: std::sync::Mutex<Vec<UsageRecord>>,
}

#[cfg(test)]
impl MemoryUsageSink {
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait]
impl UsageSink for MemoryUsageSink {
    async fn record(&self, record: UsageRecord) -> Result<()> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
        Ok(())
    }
}
