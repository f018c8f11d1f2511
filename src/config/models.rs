use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub model_aliases: HashMap<String, String>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub include_headers: bool,
    #[serde(default)]
    pub include_body: bool,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_headers: true,
            include_body: false,
            level: "info".to_string(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Site-wide routing and dispatch settings, handed to the selector and the
/// orchestrator when they are constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub visibility_mode: VisibilityMode,
    /// Extra rounds after the first one; a round is only repeated when the
    /// previous one saw a retryable channel.
    #[serde(default = "default_retry_rounds")]
    pub retry_rounds: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_anthropic_version")]
    pub anthropic_version: String,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            visibility_mode: VisibilityMode::All,
            retry_rounds: default_retry_rounds(),
            retry_delay_ms: default_retry_delay_ms(),
            anthropic_version: default_anthropic_version(),
            default_max_tokens: default_max_tokens(),
            timeout_seconds: default_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl GatewayConfig {
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn default_retry_rounds() -> usize {
    1
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_anthropic_version() -> String {
    "2023-06-01".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityMode {
    #[default]
    All,
    Shared,
}

/// Wire dialect a channel speaks natively.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApiFormat {
    OpenAI,
    Anthropic,
    Custom,
}

impl ApiFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiFormat::OpenAI => "openai",
            ApiFormat::Anthropic => "anthropic",
            ApiFormat::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    #[default]
    Active,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelModel {
    pub id: String,
    /// Price per million prompt tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_price: Option<f64>,
    /// Price per million completion tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared: Option<bool>,
}

impl ChannelModel {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            input_price: None,
            output_price: None,
            shared: None,
        }
    }

    /// Only an explicit `shared: false` hides a model from end-user tokens.
    pub fn is_shared_visible(&self) -> bool {
        self.shared != Some(false)
    }
}

/// An upstream backend: credentials, base URL, native dialect and catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default = "default_weight")]
    pub weight: i64,
    #[serde(default)]
    pub status: ChannelStatus,
    pub api_format: ApiFormat,
    #[serde(default)]
    pub models: Vec<ChannelModel>,
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
}

fn default_weight() -> i64 {
    1
}

pub const MAX_CHANNEL_WEIGHT: i64 = 1_000_000;

impl Channel {
    pub fn effective_weight(&self) -> u64 {
        self.weight.max(1) as u64
    }

    pub fn is_active(&self) -> bool {
        self.status == ChannelStatus::Active
    }

    pub fn model(&self, id: &str) -> Option<&ChannelModel> {
        self.models.iter().find(|m| m.id == id)
    }
}

/// A client credential. Tokens with a `user_id` belong to an end-user
/// account; the rest are service tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Token {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_channels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<f64>,
}

impl Token {
    pub fn anonymous() -> Self {
        Self {
            id: "anonymous".to_string(),
            name: "anonymous".to_string(),
            key: String::new(),
            user_id: None,
            allowed_channels: None,
            quota: None,
        }
    }

    pub fn is_user_token(&self) -> bool {
        self.user_id.is_some()
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.gateway.timeout_seconds == 0 {
            return Err("gateway.timeout_seconds must be > 0".to_string());
        }

        let mut channel_ids = HashSet::new();
        for channel in &self.channels {
            if channel.id.is_empty() {
                return Err(format!("Channel '{}' has empty id", channel.name));
            }
            if !channel_ids.insert(channel.id.as_str()) {
                return Err(format!("Duplicate channel id '{}'", channel.id));
            }
            if channel.name.is_empty() {
                return Err(format!("Channel '{}' has empty name", channel.id));
            }
            if channel.base_url.is_empty() {
                return Err(format!("Channel '{}' has empty base_url", channel.name));
            }
            if channel.weight > MAX_CHANNEL_WEIGHT {
                return Err(format!(
                    "Channel '{}' weight {} exceeds {}",
                    channel.name, channel.weight, MAX_CHANNEL_WEIGHT
                ));
            }
            for model in &channel.models {
                let negative = [model.input_price, model.output_price]
                    .iter()
                    .flatten()
                    .any(|price| *price < 0.0);
                if negative {
                    return Err(format!(
                        "Channel '{}' model '{}' has a negative price",
                        channel.name, model.id
                    ));
                }
            }
        }

        let mut token_keys = HashSet::new();
        for token in &self.tokens {
            if token.key.is_empty() {
                return Err(format!("Token '{}' has empty key", token.id));
            }
            if !token_keys.insert(token.key.as_str()) {
                return Err(format!("Token '{}' reuses an existing key", token.id));
            }
        }

        Ok(())
    }
}
