use crate::config::LoggingConfig;
use chrono::{DateTime, Utc};
use http::header::HeaderMap;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct RequestLog {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub model: Option<String>,
    pub channel: Option<String>,
    pub status_code: u16,
    pub duration_ms: u64,
    pub attempts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpstreamAttemptLog {
    pub timestamp: DateTime<Utc>,
    pub attempt: usize,
    pub channel: String,
    pub model: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpstreamOutcomeLog {
    pub timestamp: DateTime<Utc>,
    pub attempt: usize,
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-request logger. Credentials in logged headers are always redacted.
pub struct RequestLogger {
    config: LoggingConfig,
    start_time: Instant,
}

impl RequestLogger {
    pub fn new(config: LoggingConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
        }
    }

    pub fn log_request(&self, method: &str, path: &str, headers: &HeaderMap, body: Option<&str>) {
        if !self.config.enabled {
            return;
        }

        tracing::info!(
            method = method,
            path = path,
            headers = ?self.headers(headers),
            body = ?self.body(body),
            "Incoming request"
        );
    }

    pub fn log_upstream_attempt(
        &self,
        attempt: usize,
        channel: &str,
        model: &str,
        url: &str,
        headers: &HeaderMap,
        body: Option<&str>,
    ) {
        if !self.config.enabled {
            return;
        }

        let log = UpstreamAttemptLog {
            timestamp: Utc::now(),
            attempt,
            channel: channel.to_string(),
            model: model.to_string(),
            url: url.to_string(),
            headers: self.headers(headers),
            body: self.body(body),
        };

        tracing::debug!(log = ?log, "Upstream attempt");
    }

    pub fn log_upstream_outcome(
        &self,
        attempt: usize,
        channel: &str,
        status_code: Option<u16>,
        error: Option<&str>,
    ) {
        if !self.config.enabled {
            return;
        }

        let log = UpstreamOutcomeLog {
            timestamp: Utc::now(),
            attempt,
            channel: channel.to_string(),
            status_code,
            duration_ms: self.elapsed_ms(),
            error: error.map(|s| s.to_string()),
        };

        match status_code {
            Some(status) if (200..300).contains(&status) => {
                tracing::debug!(log = ?log, "Upstream responded")
            }
            _ => tracing::warn!(log = ?log, "Upstream attempt failed"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_response(
        &self,
        method: &str,
        path: &str,
        model: Option<&str>,
        channel: Option<&str>,
        status_code: u16,
        attempts: usize,
        error: Option<&str>,
    ) {
        if !self.config.enabled {
            return;
        }

        let log = RequestLog {
            timestamp: Utc::now(),
            method: method.to_string(),
            path: path.to_string(),
            model: model.map(|s| s.to_string()),
            channel: channel.map(|s| s.to_string()),
            status_code,
            duration_ms: self.elapsed_ms(),
            attempts,
            error: error.map(|s| s.to_string()),
        };

        if status_code >= 500 {
            tracing::error!(log = ?log, "Request completed");
        } else if status_code >= 400 {
            tracing::warn!(log = ?log, "Request completed");
        } else {
            tracing::info!(log = ?log, "Request completed");
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    fn headers(&self, headers: &HeaderMap) -> Option<HashMap<String, String>> {
        self.config
            .include_headers
            .then(|| Self::headers_to_map(headers))
    }

    fn body(&self, body: Option<&str>) -> Option<String> {
        if self.config.include_body {
            body.map(|s| s.to_string())
        } else {
            None
        }
    }

    fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                let key = name.to_string();
                let val = if Self::is_sensitive_header(&key) {
                    "[REDACTED]".to_string()
                } else {
                    value.to_str().unwrap_or("<invalid>").to_string()
                };
                (key, val)
            })
            .collect()
    }

    fn is_sensitive_header(name: &str) -> bool {
        let lower = name.to_lowercase();
        lower.contains("authorization")
            || lower.contains("api-key")
            || lower.contains("api_key")
            || lower.contains("apikey")
            || lower.contains("token")
            || lower.contains("cookie")
            || lower.contains("secret")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn config(enabled: bool, include_headers: bool, include_body: bool) -> LoggingConfig {
        LoggingConfig {
            enabled,
            include_headers,
            include_body,
            ..LoggingConfig::default()
        }
    }

    #[test]
    fn test_is_sensitive_header() {
        assert!(RequestLogger::is_sensitive_header("Authorization"));
        assert!(RequestLogger::is_sensitive_header("X-API-Key"));
        assert!(RequestLogger::is_sensitive_header("x-goog-api-key"));
        assert!(RequestLogger::is_sensitive_header("Cookie"));
        assert!(RequestLogger::is_sensitive_header("X-Auth-Token"));

        assert!(!RequestLogger::is_sensitive_header("Content-Type"));
        assert!(!RequestLogger::is_sensitive_header("anthropic-version"));
        assert!(!RequestLogger::is_sensitive_header("x-usage-prompt-tokens"));
    }

    #[test]
    fn test_headers_to_map_redacts_sensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        headers.insert("x-api-key", HeaderValue::from_static("sk-123456"));

        let map = RequestLogger::headers_to_map(&headers);

        assert_eq!(map.get("content-type").unwrap(), "application/json");
        assert_eq!(map.get("authorization").unwrap(), "[REDACTED]");
        assert_eq!(map.get("x-api-key").unwrap(), "[REDACTED]");
    }

    #[test]
    fn test_logger_respects_config() {
        let logger = RequestLogger::new(config(false, true, true));
        let headers = HeaderMap::new();

        // Disabled logging is a no-op.
        logger.log_request("POST", "/v1/messages", &headers, None);
        logger.log_upstream_outcome(1, "primary", None, Some("connect error"));
    }

    #[test]
    fn test_body_and_headers_gated() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace", HeaderValue::from_static("abc"));

        let quiet = RequestLogger::new(config(true, false, false));
        assert!(quiet.headers(&headers).is_none());
        assert!(quiet.body(Some("{}")).is_none());

        let verbose = RequestLogger::new(config(true, true, true));
        assert_eq!(verbose.headers(&headers).unwrap().get("x-trace").unwrap(), "abc");
        assert_eq!(verbose.body(Some("{}")).as_deref(), Some("{}"));
    }
}
