//! Multi-channel, multi-key dispatch with round-level retries.

use super::client::ProxyClient;
use super::planner::PreparedRequest;
use super::selector::Candidate;
use crate::config::{ApiFormat, GatewayConfig};
use crate::logging::RequestLogger;
use crate::transform::headers::with_credentials;
use crate::types::Result;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use rand::seq::SliceRandom;
use reqwest::Response;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptClass {
    Success,
    Retryable,
    Terminal,
}

/// 2xx succeeds; 408, 429 and 5xx are worth another key or channel;
/// anything else is the upstream's final word on this request.
pub fn classify_status(status: StatusCode) -> AttemptClass {
    if status.is_success() {
        AttemptClass::Success
    } else if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        AttemptClass::Retryable
    } else {
        AttemptClass::Terminal
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Rounds after the first.
    pub retry_rounds: usize,
    pub delay: Duration,
}

impl From<&GatewayConfig> for RetryPolicy {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            retry_rounds: config.retry_rounds,
            delay: config.retry_delay(),
        }
    }
}

pub struct UpstreamSuccess {
    pub candidate: Candidate,
    pub prepared: PreparedRequest,
    pub response: Response,
    pub attempts: usize,
}

#[derive(Debug, Clone)]
pub struct TerminalFailure {
    pub candidate: Candidate,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub enum DispatchOutcome {
    Success(UpstreamSuccess),
    /// Only non-retryable errors were seen in the last round; the most
    /// recent one is passed through to the client.
    Terminal(TerminalFailure),
    /// Every channel failed with something retryable (or nothing could be
    /// sent at all).
    Exhausted { attempts: usize },
}

enum AttemptResult {
    Success(Response),
    Retryable,
    Terminal {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
}

enum RoundResult {
    Success(UpstreamSuccess),
    Exhausted {
        saw_retryable: bool,
        terminal: Option<TerminalFailure>,
    },
}

pub struct Orchestrator {
    client: ProxyClient,
    policy: RetryPolicy,
}

impl Orchestrator {
    pub fn new(client: ProxyClient, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Walk the candidates in order, trying each channel's keys in a fresh
    /// random order, until one attempt succeeds. A further round runs only
    /// when the previous one saw at least one retryable channel.
    pub async fn dispatch<F>(
        &self,
        candidates: &[Candidate],
        prepare: F,
        logger: &RequestLogger,
    ) -> DispatchOutcome
    where
        F: Fn(&Candidate) -> Result<PreparedRequest>,
    {
        let plans: Vec<(&Candidate, PreparedRequest)> = candidates
            .iter()
            .filter_map(|candidate| match prepare(candidate) {
                Ok(prepared) => Some((candidate, prepared)),
                Err(e) => {
                    tracing::warn!(
                        channel = %candidate.channel.name,
                        error = %e,
                        "Skipping channel, request could not be prepared"
                    );
                    None
                }
            })
            .collect();

        let mut attempts = 0;
        let mut last_terminal = None;
        let mut on_fallback = vec![false; plans.len()];
        let total_rounds = self.policy.retry_rounds + 1;

        for round in 0..total_rounds {
            if round > 0 {
                tracing::info!(
                    round = round,
                    delay_ms = self.policy.delay.as_millis() as u64,
                    "Retrying channels after retryable failures"
                );
                sleep(self.policy.delay).await;
            }

            match self
                .walk_round(&plans, &mut on_fallback, logger, &mut attempts)
                .await
            {
                RoundResult::Success(success) => return DispatchOutcome::Success(success),
                RoundResult::Exhausted {
                    saw_retryable,
                    terminal,
                } => {
                    if !saw_retryable {
                        return match terminal {
                            Some(failure) => DispatchOutcome::Terminal(failure),
                            None => DispatchOutcome::Exhausted { attempts },
                        };
                    }
                    last_terminal = terminal;
                }
            }
        }

        if let Some(failure) = &last_terminal {
            tracing::debug!(
                channel = %failure.candidate.channel.name,
                status = failure.status.as_u16(),
                "Discarding terminal response, last round also had retryable failures"
            );
        }
        DispatchOutcome::Exhausted { attempts }
    }

    /// `on_fallback[i]` is set once channel `i` has switched to its legacy
    /// route; its later keys and rounds go straight there.
    async fn walk_round(
        &self,
        plans: &[(&Candidate, PreparedRequest)],
        on_fallback: &mut [bool],
        logger: &RequestLogger,
        attempts: &mut usize,
    ) -> RoundResult {
        let mut saw_retryable = false;
        let mut terminal = None;

        for ((candidate, prepared), on_fallback) in plans.iter().zip(on_fallback.iter_mut()) {
            let channel = &candidate.channel;
            let mut keys: Vec<&str> = channel.api_keys.iter().map(String::as_str).collect();
            keys.shuffle(&mut rand::thread_rng());
            if keys.is_empty() {
                keys.push("");
            }

            let mut channel_terminal = None;
            for key in keys {
                match self
                    .attempt(candidate, prepared, key, on_fallback, logger, attempts)
                    .await
                {
                    AttemptResult::Success(response) => {
                        return RoundResult::Success(UpstreamSuccess {
                            candidate: (*candidate).clone(),
                            prepared: prepared.clone(),
                            response,
                            attempts: *attempts,
                        });
                    }
                    AttemptResult::Retryable => {}
                    AttemptResult::Terminal {
                        status,
                        headers,
                        body,
                    } => {
                        channel_terminal = Some(TerminalFailure {
                            candidate: (*candidate).clone(),
                            status,
                            headers,
                            body,
                        });
                        break;
                    }
                }
            }

            match channel_terminal {
                Some(failure) => terminal = Some(failure),
                None => saw_retryable = true,
            }
        }

        RoundResult::Exhausted {
            saw_retryable,
            terminal,
        }
    }

    async fn attempt(
        &self,
        candidate: &Candidate,
        prepared: &PreparedRequest,
        key: &str,
        on_fallback: &mut bool,
        logger: &RequestLogger,
        attempts: &mut usize,
    ) -> AttemptResult {
        let channel = &candidate.channel;
        let headers = match with_credentials(&prepared.headers, channel, key) {
            Ok(headers) => headers,
            Err(e) => {
                tracing::warn!(channel = %channel.name, error = %e, "Invalid upstream headers");
                return AttemptResult::Retryable;
            }
        };

        if let (true, Some(fallback)) = (*on_fallback, &prepared.fallback) {
            return self
                .send(candidate, &fallback.url, &fallback.body, headers, logger, attempts)
                .await;
        }

        let result = self
            .send(candidate, &prepared.url, &prepared.body, headers.clone(), logger, attempts)
            .await;

        let terminal_status = match &result {
            AttemptResult::Terminal { status, .. } => Some(*status),
            _ => None,
        };
        let (Some(status), Some(fallback)) = (terminal_status, &prepared.fallback) else {
            return result;
        };
        if channel.api_format != ApiFormat::OpenAI
            || !matches!(status, StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND)
        {
            return result;
        }

        tracing::info!(
            channel = %channel.name,
            status = status.as_u16(),
            url = %fallback.url,
            "Responses endpoint rejected, falling back to chat completions"
        );
        *on_fallback = true;
        self.send(candidate, &fallback.url, &fallback.body, headers, logger, attempts)
            .await
    }

    async fn send(
        &self,
        candidate: &Candidate,
        url: &str,
        body: &Bytes,
        headers: HeaderMap,
        logger: &RequestLogger,
        attempts: &mut usize,
    ) -> AttemptResult {
        *attempts += 1;
        let attempt = *attempts;
        let channel = &candidate.channel;

        logger.log_upstream_attempt(
            attempt,
            &channel.name,
            &candidate.model,
            url,
            &headers,
            std::str::from_utf8(body).ok(),
        );

        let response = match self.client.post(url, headers, body.clone()).await {
            Ok(response) => response,
            Err(e) => {
                logger.log_upstream_outcome(attempt, &channel.name, None, Some(&e.to_string()));
                return AttemptResult::Retryable;
            }
        };

        let status = response.status();
        match classify_status(status) {
            AttemptClass::Success => {
                logger.log_upstream_outcome(attempt, &channel.name, Some(status.as_u16()), None);
                AttemptResult::Success(response)
            }
            AttemptClass::Retryable => {
                logger.log_upstream_outcome(
                    attempt,
                    &channel.name,
                    Some(status.as_u16()),
                    Some("retryable status"),
                );
                AttemptResult::Retryable
            }
            AttemptClass::Terminal => {
                let headers = response.headers().clone();
                let body = response.bytes().await.unwrap_or_default();
                logger.log_upstream_outcome(
                    attempt,
                    &channel.name,
                    Some(status.as_u16()),
                    Some(&String::from_utf8_lossy(&body)),
                );
                AttemptResult::Terminal {
                    status,
                    headers,
                    body,
                }
            }
        }
    }
}
