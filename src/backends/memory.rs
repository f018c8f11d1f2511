//! Collaborators backed by the loaded configuration.

use super::traits::{ChannelCatalog, ModelPrice, PricingLookup, TokenQuota, TokenStore};
use crate::config::{Channel, Token};
use crate::types::{GatewayError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

pub struct StaticChannelCatalog {
    channels: Vec<Channel>,
}

impl StaticChannelCatalog {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl ChannelCatalog for StaticChannelCatalog {
    async fn list_active(&self) -> Result<Vec<Channel>> {
        Ok(self
            .channels
            .iter()
            .filter(|c| c.is_active())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PricingLookup for StaticChannelCatalog {
    async fn price(&self, channel_id: &str, model: &str) -> Result<Option<ModelPrice>> {
        let entry = self
            .channels
            .iter()
            .find(|c| c.id == channel_id)
            .and_then(|c| c.model(model));

        Ok(entry.and_then(|m| match (m.input_price, m.output_price) {
            (None, None) => None,
            (input, output) => Some(ModelPrice {
                input_price: input.unwrap_or(0.0),
                output_price: output.unwrap_or(0.0),
            }),
        }))
    }
}

/// Looks tokens up by key. With no tokens configured every request runs
/// as the anonymous service token.
pub struct StaticTokenStore {
    tokens: HashMap<String, Token>,
}

impl StaticTokenStore {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens: tokens.into_iter().map(|t| (t.key.clone(), t)).collect(),
        }
    }
}

#[async_trait]
impl TokenStore for StaticTokenStore {
    async fn authenticate(&self, key: Option<&str>) -> Result<Token> {
        if self.tokens.is_empty() {
            return Ok(Token::anonymous());
        }
        key.and_then(|k| self.tokens.get(k))
            .cloned()
            .ok_or(GatewayError::Unauthorized)
    }
}

/// Remaining balance per token; tokens without a configured quota are
/// unlimited. Read-then-write with no cross-request coordination.
pub struct InMemoryQuota {
    balances: Mutex<HashMap<String, f64>>,
}

impl InMemoryQuota {
    pub fn new(tokens: &[Token]) -> Self {
        let balances = tokens
            .iter()
            .filter_map(|t| t.quota.map(|q| (t.id.clone(), q)))
            .collect();
        Self {
            balances: Mutex::new(balances),
        }
    }

    pub fn remaining(&self, token_id: &str) -> Option<f64> {
        self.balances
            .lock()
            .ok()
            .and_then(|b| b.get(token_id).copied())
    }
}

#[async_trait]
impl TokenQuota for InMemoryQuota {
    async fn check(&self, token_id: &str, cost: f64) -> Result<bool> {
        let balances = self
            .balances
            .lock()
            .map_err(|e| GatewayError::Internal(format!("quota lock poisoned: {}", e)))?;
        Ok(match balances.get(token_id) {
            Some(balance) => *balance > 0.0 && *balance >= cost,
            None => true,
        })
    }

    async fn consume(&self, token_id: &str, amount: f64) -> Result<()> {
        let mut balances = self
            .balances
            .lock()
            .map_err(|e| GatewayError::Internal(format!("quota lock poisoned: {}", e)))?;
        if let Some(balance) = balances.get_mut(token_id) {
            *balance -= amount;
        }
        Ok(())
    }
}
