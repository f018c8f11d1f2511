use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid API key")]
    Unauthorized,

    #[error("Token quota exhausted")]
    QuotaExceeded,

    #[error("Model '{0}' is not available on any channel")]
    ModelNotFound(String),

    #[error("Model '{0}' is not shared with this account")]
    ModelNotShared(String),

    #[error("No available channels")]
    NoAvailableChannels,

    #[error("All upstream channels failed after {attempts} attempts")]
    UpstreamUnavailable { attempts: usize },

    #[error("Transformation error: {0}")]
    Transform(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Header error: {0}")]
    Header(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::ModelNotShared(_) => StatusCode::FORBIDDEN,
            GatewayError::NoAvailableChannels => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Transform(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Http(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Json(_) => StatusCode::BAD_REQUEST,
            GatewayError::Yaml(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Regex(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Header(_) => StatusCode::BAD_REQUEST,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &str {
        match self {
            GatewayError::Config(_) => "configuration_error",
            GatewayError::Unauthorized => "invalid_api_key",
            GatewayError::QuotaExceeded => "insufficient_quota",
            GatewayError::ModelNotFound(_) => "model_not_found",
            GatewayError::ModelNotShared(_) => "model_not_shared",
            GatewayError::NoAvailableChannels => "no_available_channels",
            GatewayError::UpstreamUnavailable { .. } => "upstream_unavailable",
            GatewayError::Transform(_) => "transformation_error",
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::Http(_) => "http_error",
            GatewayError::Json(_) => "json_error",
            GatewayError::Yaml(_) => "yaml_error",
            GatewayError::Regex(_) => "regex_error",
            GatewayError::Io(_) => "io_error",
            GatewayError::Header(_) => "header_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// OpenAI-style error envelope.
    pub fn to_openai_body(&self) -> Value {
        json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
                "code": self.status_code().as_u16(),
            }
        })
    }

    /// Anthropic-style error envelope, used on the Messages endpoint.
    pub fn to_anthropic_body(&self) -> Value {
        json!({
            "type": "error",
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
            }
        })
    }

    pub fn into_anthropic_response(self) -> Response {
        let status = self.status_code();
        log_failure(&self, status);
        (status, Json(self.to_anthropic_body())).into_response()
    }
}

fn log_failure(error: &GatewayError, status: StatusCode) {
    if status.is_server_error() {
        tracing::error!(
            error_type = error.error_type(),
            status = status.as_u16(),
            message = %error,
            "Request failed"
        );
    } else {
        tracing::warn!(
            error_type = error.error_type(),
            status = status.as_u16(),
            message = %error,
            "Request rejected"
        );
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        log_failure(&self, status);
        (status, Json(self.to_openai_body())).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_error_statuses() {
        assert_eq!(
            GatewayError::ModelNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::ModelNotShared("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::NoAvailableChannels.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::UpstreamUnavailable { attempts: 3 }.status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_error_bodies() {
        let err = GatewayError::UpstreamUnavailable { attempts: 2 };
        let openai = err.to_openai_body();
        assert_eq!(openai["error"]["type"], "upstream_unavailable");
        assert_eq!(openai["error"]["code"], 502);

        let anthropic = err.to_anthropic_body();
        assert_eq!(anthropic["type"], "error");
        assert_eq!(anthropic["error"]["type"], "upstream_unavailable");
    }
}
