use super::{calculate_cost, NormalizedUsage};
use crate::backends::{PricingLookup, TokenQuota, UsageSink};
use crate::config::{Channel, Token};
use crate::logging::{UsageRecord, UsageStatus};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

/// What the gateway knows about a request before it is dispatched.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub token: Token,
    pub requested_model: String,
    pub path: String,
    pub is_stream: bool,
    pub reasoning_effort: Option<String>,
    pub started: Instant,
}

/// Prices usage, charges the token and hands a record to the sink.
///
/// Every failure along the way is logged and swallowed; recording never
/// affects the response already sent to the client.
#[derive(Clone)]
pub struct UsageRecorder {
    sink: Arc<dyn UsageSink>,
    quota: Arc<dyn TokenQuota>,
    pricing: Arc<dyn PricingLookup>,
}

impl UsageRecorder {
    pub fn new(
        sink: Arc<dyn UsageSink>,
        quota: Arc<dyn TokenQuota>,
        pricing: Arc<dyn PricingLookup>,
    ) -> Self {
        Self {
            sink,
            quota,
            pricing,
        }
    }

    pub async fn record_success(
        &self,
        ctx: &RequestContext,
        channel: &Channel,
        model: &str,
        http_status: u16,
        usage: NormalizedUsage,
    ) {
        let price = match self.pricing.price(&channel.id, model).await {
            Ok(price) => price,
            Err(e) => {
                tracing::warn!(channel = %channel.name, model = %model, error = %e, "Price lookup failed");
                None
            }
        };
        let cost = calculate_cost(&usage, price.as_ref());

        if cost > 0.0 {
            if let Err(e) = self.quota.consume(&ctx.token.id, cost).await {
                tracing::warn!(token = %ctx.token.id, cost, error = %e, "Failed to charge token");
            }
        }

        let record = build_record(
            ctx,
            Some(channel),
            Some(model),
            http_status,
            UsageStatus::Success,
            usage,
            cost,
        );
        self.emit(record).await;
    }

    pub async fn record_failure(&self, ctx: &RequestContext, channel: Option<&Channel>, http_status: u16) {
        let record = build_record(
            ctx,
            channel,
            None,
            http_status,
            UsageStatus::Error,
            NormalizedUsage::zero(),
            0.0,
        );
        self.emit(record).await;
    }

    async fn emit(&self, record: UsageRecord) {
        if let Err(e) = self.sink.record(record).await {
            tracing::warn!(error = %e, "Failed to write usage record");
        }
    }
}

fn build_record(
    ctx: &RequestContext,
    channel: Option<&Channel>,
    model: Option<&str>,
    http_status: u16,
    status: UsageStatus,
    usage: NormalizedUsage,
    cost: f64,
) -> UsageRecord {
    UsageRecord {
        timestamp: Utc::now(),
        token_id: ctx.token.id.clone(),
        user_id: ctx.token.user_id.clone(),
        channel_id: channel.map(|c| c.id.clone()),
        channel_name: channel.map(|c| c.name.clone()),
        requested_model: ctx.requested_model.clone(),
        model: model.map(str::to_string),
        path: ctx.path.clone(),
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        first_token_latency_ms: usage.first_token_latency_ms,
        duration_ms: ctx.started.elapsed().as_millis() as u64,
        cost,
        http_status,
        status,
        is_stream: ctx.is_stream,
        reasoning_effort: ctx.reasoning_effort.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryQuota, StaticChannelCatalog};
    use crate::config::{ApiFormat, ChannelModel, ChannelStatus};
    use crate::logging::MemoryUsageSink;
    use std::collections::HashMap;

    fn channel() -> Channel {
        Channel {
            id: "c1".to_string(),
            name: "primary".to_string(),
            base_url: "https://api.example.com".to_string(),
            api_keys: vec![],
            weight: 1,
            status: ChannelStatus::Active,
            api_format: ApiFormat::OpenAI,
            models: vec![ChannelModel {
                id: "gpt-4".to_string(),
                input_price: Some(1.0),
                output_price: Some(2.0),
                shared: None,
            }],
            custom_headers: HashMap::new(),
        }
    }

    fn token() -> Token {
        Token {
            id: "t1".to_string(),
            name: "test".to_string(),
            key: "sk-test".to_string(),
            user_id: Some("u1".to_string()),
            allowed_channels: None,
            quota: Some(10.0),
        }
    }

    fn context() -> RequestContext {
        RequestContext {
            token: token(),
            requested_model: "gpt-4".to_string(),
            path: "/v1/chat/completions".to_string(),
            is_stream: false,
            reasoning_effort: None,
            started: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_record_success_charges_and_records() {
        let sink = Arc::new(MemoryUsageSink::default());
        let quota = Arc::new(InMemoryQuota::new(&[token()]));
        let pricing = Arc::new(StaticChannelCatalog::new(vec![channel()]));
        let recorder = UsageRecorder::new(sink.clone(), quota.clone(), pricing);

        let usage = NormalizedUsage::new(1_000_000, 500_000, None);
        recorder
            .record_success(&context(), &channel(), "gpt-4", 200, usage)
            .await;

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, UsageStatus::Success);
        assert!((records[0].cost - 2.0).abs() < 1e-9);
        assert_eq!(records[0].channel_id.as_deref(), Some("c1"));
        assert_eq!(records[0].user_id.as_deref(), Some("u1"));
        assert!((quota.remaining("t1").unwrap() - 8.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_record_failure_is_zero_cost() {
        let sink = Arc::new(MemoryUsageSink::default());
        let quota = Arc::new(InMemoryQuota::new(&[token()]));
        let pricing = Arc::new(StaticChannelCatalog::new(vec![channel()]));
        let recorder = UsageRecorder::new(sink.clone(), quota.clone(), pricing);

        recorder.record_failure(&context(), None, 502).await;

        let records = sink.records();
        assert_eq!(records[0].status, UsageStatus::Error);
        assert_eq!(records[0].http_status, 502);
        assert_eq!(records[0].cost, 0.0);
        assert_eq!(records[0].total_tokens, 0);
        assert!(records[0].channel_id.is_none());
        assert_eq!(quota.remaining("t1"), Some(10.0));
    }
}
