use crate::config::{Channel, Token};
use crate::logging::UsageRecord;
use crate::types::Result;
use async_trait::async_trait;

/// Source of the active-channel snapshot, fetched fresh per request.
#[async_trait]
pub trait ChannelCatalog: Send + Sync {
    async fn list_active(&self) -> Result<Vec<Channel>>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn authenticate(&self, key: Option<&str>) -> Result<Token>;
}

#[async_trait]
pub trait TokenQuota: Send + Sync {
    async fn check(&self, token_id: &str, cost: f64) -> Result<bool>;
    async fn consume(&self, token_id: &str, amount: f64) -> Result<()>;
}

/// Must tolerate being called fire-and-forget from a detached task.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, record: UsageRecord) -> Result<()>;
}

/// Per-million-token prices for one model on one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input_price: f64,
    pub output_price: f64,
}

#[async_trait]
pub trait PricingLookup: Send + Sync {
    async fn price(&self, channel_id: &str, model: &str) -> Result<Option<ModelPrice>>;
}
