use super::models::Config;
use crate::types::{GatewayError, Result};
use regex::{Captures, Regex};
use std::fs;
use std::path::Path;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path.as_ref())
        .map_err(|e| GatewayError::Config(format!("Failed to read config file: {}", e)))?;

    parse_config(&content, is_json_path(path.as_ref()))
}

fn is_json_path(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("json")
}

/// Parse a configuration document after expanding `${VAR}` references.
pub fn parse_config(content: &str, json: bool) -> Result<Config> {
    let expanded = expand_env_vars(content)?;

    let config: Config = if json {
        serde_json::from_str(&expanded)
            .map_err(|e| GatewayError::Config(format!("Failed to parse JSON config: {}", e)))?
    } else {
        serde_yaml::from_str(&expanded)
            .map_err(|e| GatewayError::Config(format!("Failed to parse YAML config: {}", e)))?
    };

    config
        .validate()
        .map_err(|e| GatewayError::Config(format!("Invalid configuration: {}", e)))?;

    Ok(config)
}

// ${VAR_NAME} or ${VAR_NAME:-default}
fn expand_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}")?;

    let expanded = re.replace_all(content, |cap: &Captures| {
        let var_name = &cap[1];
        std::env::var(var_name)
            .ok()
            .or_else(|| cap.get(3).map(|m| m.as_str().to_string()))
            .unwrap_or_else(|| {
                tracing::warn!(
                    "Environment variable '{}' not found and no default provided",
                    var_name
                );
                String::new()
            })
    });

    Ok(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars_simple() {
        std::env::set_var("GW_TEST_VAR", "test_value");
        let output = expand_env_vars("key: ${GW_TEST_VAR}").unwrap();
        assert_eq!(output, "key: test_value");
        std::env::remove_var("GW_TEST_VAR");
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        std::env::remove_var("GW_MISSING_VAR");
        let output = expand_env_vars("key: ${GW_MISSING_VAR:-default_value}").unwrap();
        assert_eq!(output, "key: default_value");
    }

    #[test]
    fn test_expand_env_vars_multiple() {
        std::env::set_var("GW_VAR1", "value1");
        std::env::set_var("GW_VAR2", "value2");
        let output = expand_env_vars("key1: ${GW_VAR1}, key2: ${GW_VAR2}").unwrap();
        assert_eq!(output, "key1: value1, key2: value2");
        std::env::remove_var("GW_VAR1");
        std::env::remove_var("GW_VAR2");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        std::env::remove_var("GW_MISSING");
        let output = expand_env_vars("key: ${GW_MISSING}").unwrap();
        assert_eq!(output, "key: ");
    }

    #[test]
    fn test_parse_full_config() {
        std::env::set_var("GW_TEST_OPENAI_KEY", "sk-test");
        let yaml = r#"
server:
  port: 9000
gateway:
  visibility_mode: shared
  retry_rounds: 2
  retry_delay_ms: 50
model_aliases:
  gpt4: gpt-4
channels:
  - id: "1"
    name: openai-main
    base_url: https://api.openai.com/v1
    api_keys: ["${GW_TEST_OPENAI_KEY}"]
    api_format: openai
    weight: 3
    models:
      - id: gpt-4
        input_price: 30
        output_price: 60
tokens:
  - id: t1
    key: sk-gw-1
    user_id: u1
"#;
        let config = parse_config(yaml, false).unwrap();
        std::env::remove_var("GW_TEST_OPENAI_KEY");

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.gateway.retry_rounds, 2);
        assert_eq!(config.model_aliases.get("gpt4").unwrap(), "gpt-4");
        assert_eq!(config.channels[0].api_keys, vec!["sk-test".to_string()]);
        assert_eq!(config.channels[0].effective_weight(), 3);
        assert!(config.tokens[0].is_user_token());
    }

    #[test]
    fn test_parse_rejects_invalid_config() {
        let yaml = r#"
server: {}
channels:
  - id: "1"
    name: broken
    base_url: ""
    api_format: custom
"#;
        let err = parse_config(yaml, false).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }
}
