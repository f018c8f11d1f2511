//! Request pipeline: select channels, dispatch, translate the response and
//! account for usage.

use super::client::ProxyClient;
use super::envelope::{Endpoint, RequestEnvelope};
use super::planner::{RequestPlanner, ResponseTranslation};
use super::retry::{DispatchOutcome, Orchestrator, RetryPolicy, TerminalFailure, UpstreamSuccess};
use super::router::ModelResolver;
use super::selector::ChannelSelector;
use crate::backends::{ChannelCatalog, PricingLookup, TokenQuota, UsageSink};
use crate::config::{Config, GatewayConfig, LoggingConfig, Token};
use crate::logging::RequestLogger;
use crate::streaming::{AnthropicToOpenAiStream, OpenAiToAnthropicStream, TranslatedStream};
use crate::transform::response::{anthropic_body_to_openai, openai_body_to_anthropic};
use crate::types::{GatewayError, Result};
use crate::usage::{extract_non_streaming, scan_stream_usage, RequestContext, UsageRecorder};
use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, StatusCode};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

pub struct Gateway {
    catalog: Arc<dyn ChannelCatalog>,
    quota: Arc<dyn TokenQuota>,
    selector: ChannelSelector,
    orchestrator: Orchestrator,
    recorder: UsageRecorder,
    config: GatewayConfig,
    logging: LoggingConfig,
}

impl Gateway {
    pub fn new(
        config: &Config,
        catalog: Arc<dyn ChannelCatalog>,
        quota: Arc<dyn TokenQuota>,
        pricing: Arc<dyn PricingLookup>,
        sink: Arc<dyn UsageSink>,
    ) -> Result<Self> {
        let gateway = config.gateway.clone();
        let client = ProxyClient::new(&gateway)?;

        Ok(Self {
            catalog,
            quota: quota.clone(),
            selector: ChannelSelector::new(
                gateway.clone(),
                ModelResolver::new(config.model_aliases.clone()),
            ),
            orchestrator: Orchestrator::new(client, RetryPolicy::from(&gateway)),
            recorder: UsageRecorder::new(sink, quota, pricing),
            config: gateway,
            logging: config.logging.clone(),
        })
    }

    /// Model ids visible to `token`.
    pub async fn list_models(&self, token: &Token) -> Result<Vec<String>> {
        let channels = self.catalog.list_active().await?;
        Ok(self.selector.visible_models(&channels, token))
    }

    pub async fn handle(
        &self,
        token: &Token,
        endpoint: Endpoint,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response> {
        let logger = RequestLogger::new(self.logging.clone());
        logger.log_request("POST", &endpoint.path, headers, std::str::from_utf8(&body).ok());

        let result = self.route(token, &endpoint, headers, body, &logger).await;
        if let Err(e) = &result {
            logger.log_response(
                "POST",
                &endpoint.path,
                None,
                None,
                e.status_code().as_u16(),
                0,
                Some(&e.to_string()),
            );
        }
        result
    }

    async fn route(
        &self,
        token: &Token,
        endpoint: &Endpoint,
        headers: &HeaderMap,
        body: Bytes,
        logger: &RequestLogger,
    ) -> Result<Response> {
        let envelope = RequestEnvelope::parse(endpoint, body)?;

        let channels = self.catalog.list_active().await?;
        let candidates = self
            .selector
            .select(&channels, token, endpoint, &envelope.model)?;

        match self.quota.check(&token.id, 0.0).await {
            Ok(true) => {}
            Ok(false) => return Err(GatewayError::QuotaExceeded),
            Err(e) => tracing::warn!(token = %token.id, error = %e, "Quota check failed, allowing request"),
        }

        let ctx = RequestContext {
            token: token.clone(),
            requested_model: envelope.model.clone(),
            path: endpoint.path.clone(),
            is_stream: envelope.stream,
            reasoning_effort: envelope.reasoning_effort.clone(),
            started: Instant::now(),
        };

        let planner = RequestPlanner::new(endpoint, &envelope, headers, &self.config);
        let outcome = self
            .orchestrator
            .dispatch(&candidates, |candidate| planner.prepare(candidate), logger)
            .await;

        match outcome {
            DispatchOutcome::Success(success) => self.respond(ctx, success, logger).await,
            DispatchOutcome::Terminal(failure) => {
                logger.log_response(
                    "POST",
                    &ctx.path,
                    Some(&failure.candidate.model),
                    Some(&failure.candidate.channel.name),
                    failure.status.as_u16(),
                    0,
                    Some("upstream rejected request"),
                );
                self.spawn_failure(ctx, Some(&failure), failure.status.as_u16());
                Ok(passthrough_failure(failure))
            }
            DispatchOutcome::Exhausted { attempts } => {
                let error = GatewayError::UpstreamUnavailable { attempts };
                self.spawn_failure(ctx, None, error.status_code().as_u16());
                Err(error)
            }
        }
    }

    async fn respond(
        &self,
        ctx: RequestContext,
        success: UpstreamSuccess,
        logger: &RequestLogger,
    ) -> Result<Response> {
        let UpstreamSuccess {
            candidate,
            prepared,
            response,
            attempts,
        } = success;
        let status = response.status();
        let upstream_headers = response.headers().clone();

        logger.log_response(
            "POST",
            &ctx.path,
            Some(&candidate.model),
            Some(&candidate.channel.name),
            status.as_u16(),
            attempts,
            None,
        );

        let is_event_stream = upstream_headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v.starts_with("text/event-stream"));

        if is_event_stream {
            return Ok(self.stream(ctx, candidate, prepared.translation, response, upstream_headers));
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(channel = %candidate.channel.name, error = %e, "Failed to read upstream body");
                self.spawn_failure(ctx, None, StatusCode::BAD_GATEWAY.as_u16());
                return Err(GatewayError::Http(e));
            }
        };

        let usage = extract_non_streaming(&body, &upstream_headers);
        let recorder = self.recorder.clone();
        let record_model = candidate.model.clone();
        let record_channel = candidate.channel.clone();
        tokio::spawn(async move {
            recorder
                .record_success(&ctx, &record_channel, &record_model, status.as_u16(), usage)
                .await;
        });

        let (body, headers) = match prepared.translation {
            ResponseTranslation::None => (body, passthrough_headers(&upstream_headers)),
            ResponseTranslation::AnthropicToOpenAi => (
                Bytes::from(serde_json::to_vec(&anthropic_body_to_openai(&body, &candidate.model))?),
                json_headers(),
            ),
            ResponseTranslation::OpenAiToAnthropic => (
                Bytes::from(serde_json::to_vec(&openai_body_to_anthropic(&body, &candidate.model))?),
                json_headers(),
            ),
        };

        Ok(build_response(status, headers, Body::from(body)))
    }

    /// Tee the upstream body: one copy to the client, one to a detached
    /// usage scan. The pump keeps reading after the client goes away.
    fn stream(
        &self,
        ctx: RequestContext,
        candidate: super::selector::Candidate,
        translation: ResponseTranslation,
        response: reqwest::Response,
        upstream_headers: HeaderMap,
    ) -> Response {
        let status = response.status();
        let (client_tx, mut client_rx) = mpsc::channel::<std::io::Result<Bytes>>(TEE_BUFFER);
        let (usage_tx, mut usage_rx) = mpsc::channel::<Bytes>(TEE_BUFFER);

        tokio::spawn(pump(
            Box::pin(response.bytes_stream()),
            client_tx,
            usage_tx,
            candidate.channel.name.clone(),
        ));

        let recorder = self.recorder.clone();
        let model = candidate.model.clone();
        tokio::spawn(async move {
            let copy = async_stream::stream! {
                while let Some(bytes) = usage_rx.recv().await {
                    yield bytes;
                }
            };
            let usage = scan_stream_usage(copy, &upstream_headers, ctx.started).await;
            recorder
                .record_success(&ctx, &candidate.channel, &candidate.model, status.as_u16(), usage)
                .await;
        });

        let client_stream = async_stream::stream! {
            while let Some(item) = client_rx.recv().await {
                yield item;
            }
        };

        let body = match translation {
            ResponseTranslation::None => Body::from_stream(client_stream),
            ResponseTranslation::AnthropicToOpenAi => Body::from_stream(TranslatedStream::new(
                client_stream,
                Box::new(AnthropicToOpenAiStream::new(&model)),
            )),
            ResponseTranslation::OpenAiToAnthropic => Body::from_stream(TranslatedStream::new(
                client_stream,
                Box::new(OpenAiToAnthropicStream::new(&model)),
            )),
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        build_response(status, headers, body)
    }

    fn spawn_failure(&self, ctx: RequestContext, failure: Option<&TerminalFailure>, status: u16) {
        let recorder = self.recorder.clone();
        let channel = failure.map(|f| f.candidate.channel.clone());
        tokio::spawn(async move {
            recorder.record_failure(&ctx, channel.as_ref(), status).await;
        });
    }
}

/// Chunks buffered per side of the stream tee.
const TEE_BUFFER: usize = 32;

/// Copy every upstream chunk to the usage side, and to the client while it
/// is listening. A slow client stalls the upstream read rather than growing
/// a queue; once the client is gone the rest still goes to the usage side.
async fn pump<S, E>(
    mut upstream: S,
    client_tx: mpsc::Sender<std::io::Result<Bytes>>,
    usage_tx: mpsc::Sender<Bytes>,
    channel_name: String,
) where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + std::fmt::Display,
{
    let mut client_open = true;
    while let Some(chunk) = upstream.next().await {
        match chunk {
            Ok(bytes) => {
                let _ = usage_tx.send(bytes.clone()).await;
                if client_open && client_tx.send(Ok(bytes)).await.is_err() {
                    client_open = false;
                    tracing::debug!(channel = %channel_name, "Client went away, draining upstream for usage");
                }
            }
            Err(e) => {
                tracing::warn!(channel = %channel_name, error = %e, "Upstream stream failed");
                if client_open {
                    let _ = client_tx
                        .send(Err(std::io::Error::new(std::io::ErrorKind::Other, e)))
                        .await;
                }
                break;
            }
        }
    }
}

fn passthrough_failure(failure: TerminalFailure) -> Response {
    let mut headers = HeaderMap::new();
    let content_type = failure
        .headers
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_TYPE, content_type);
    build_response(failure.status, headers, Body::from(failure.body))
}

fn passthrough_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = upstream.clone();
    for name in [CONTENT_LENGTH, TRANSFER_ENCODING, CONNECTION] {
        headers.remove(name);
    }
    headers
}

fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
