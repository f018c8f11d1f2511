use crate::config::{ApiFormat, Channel};
use crate::types::{GatewayError, Result};
use http::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::str::FromStr;

const ANTHROPIC_VERSION: &str = "anthropic-version";
const ANTHROPIC_BETA: &str = "anthropic-beta";
const X_API_KEY: &str = "x-api-key";

/// Headers that do not depend on which key is used.
pub fn base_headers(
    format: ApiFormat,
    inbound: &HeaderMap,
    anthropic_version: &str,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    let content_type = match format {
        ApiFormat::Custom => inbound
            .get(CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("application/json")),
        _ => HeaderValue::from_static("application/json"),
    };
    headers.insert(CONTENT_TYPE, content_type);

    if format == ApiFormat::Anthropic {
        headers.insert(ANTHROPIC_VERSION, header_value(ANTHROPIC_VERSION, anthropic_version)?);
        if let Some(beta) = inbound.get(ANTHROPIC_BETA) {
            headers.insert(ANTHROPIC_BETA, beta.clone());
        }
    }

    Ok(headers)
}

/// Add credentials for `key`, then (for custom channels) the channel's own
/// headers, which override anything already present.
pub fn with_credentials(base: &HeaderMap, channel: &Channel, key: &str) -> Result<HeaderMap> {
    let mut headers = base.clone();

    if !key.is_empty() {
        let api_key = header_value(X_API_KEY, key)?;
        match channel.api_format {
            ApiFormat::OpenAI | ApiFormat::Custom => {
                headers.insert(
                    AUTHORIZATION,
                    header_value("authorization", &format!("Bearer {}", key))?,
                );
                headers.insert(X_API_KEY, api_key);
            }
            ApiFormat::Anthropic => {
                headers.insert(X_API_KEY, api_key);
            }
        }
    }

    if channel.api_format == ApiFormat::Custom {
        for (key, value) in &channel.custom_headers {
            let name = HeaderName::from_str(key)
                .map_err(|e| GatewayError::Header(format!("Invalid header name '{}': {}", key, e)))?;
            headers.insert(name, header_value(key, value)?);
        }
    }

    Ok(headers)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| GatewayError::Header(format!("Invalid header value for '{}': {}", name, e)))
}
