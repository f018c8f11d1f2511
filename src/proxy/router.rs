use crate::config::Channel;
use std::collections::HashMap;

/// Expands requested model names through the configured alias table.
#[derive(Debug, Clone, Default)]
pub struct ModelResolver {
    aliases: HashMap<String, String>,
}

impl ModelResolver {
    pub fn new(aliases: HashMap<String, String>) -> Self {
        for (alias, canonical) in &aliases {
            tracing::debug!(alias = %alias, canonical = %canonical, "Registered model alias");
        }
        Self { aliases }
    }

    /// The requested name first, then its canonical id when `name` is an
    /// alias. Both are tried since either may exist on different channels.
    pub fn resolve_model_names(&self, name: &str) -> Vec<String> {
        let mut names = vec![name.to_string()];
        if let Some(canonical) = self.aliases.get(name) {
            if canonical != name {
                names.push(canonical.clone());
            }
        }
        names
    }
}

/// Outcome of `<channel>/<model>` detection.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision<'a> {
    pub pinned: Option<&'a Channel>,
    pub model: String,
}

/// Detects `"<channelName>/<modelName>"`. Names are tried longest first so a
/// channel called `abc-pro` is not shadowed by one called `abc`.
pub fn resolve_channel_route<'a>(name: &str, channels: &'a [Channel]) -> RoutingDecision<'a> {
    let passthrough = RoutingDecision {
        pinned: None,
        model: name.to_string(),
    };

    if !name.contains('/') {
        return passthrough;
    }

    let mut by_length: Vec<&Channel> = channels.iter().filter(|c| !c.name.is_empty()).collect();
    by_length.sort_by(|a, b| b.name.len().cmp(&a.name.len()));

    for channel in by_length {
        let Some(rest) = name.strip_prefix(channel.name.as_str()) else {
            continue;
        };
        let Some(model) = rest.strip_prefix('/') else {
            continue;
        };
        if model.is_empty() {
            continue;
        }
        tracing::debug!(
            channel = %channel.name,
            model = %model,
            "Request pinned to channel"
        );
        return RoutingDecision {
            pinned: Some(channel),
            model: model.to_string(),
        };
    }

    passthrough
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiFormat, ChannelModel, ChannelStatus};

    fn channel(name: &str) -> Channel {
        Channel {
            id: format!("id-{}", name),
            name: name.to_string(),
            base_url: "https://api.example.com".to_string(),
            api_keys: vec!["k".to_string()],
            weight: 1,
            status: ChannelStatus::Active,
            api_format: ApiFormat::OpenAI,
            models: vec![ChannelModel::new("gpt-4")],
            custom_headers: HashMap::new(),
        }
    }

    #[test]
    fn test_resolve_model_names_without_alias() {
        let resolver = ModelResolver::default();
        assert_eq!(resolver.resolve_model_names("gpt-4"), vec!["gpt-4"]);
    }

    #[test]
    fn test_resolve_model_names_with_alias() {
        let mut aliases = HashMap::new();
        aliases.insert("gpt4".to_string(), "gpt-4".to_string());
        aliases.insert("same".to_string(), "same".to_string());
        let resolver = ModelResolver::new(aliases);

        assert_eq!(resolver.resolve_model_names("gpt4"), vec!["gpt4", "gpt-4"]);
        assert_eq!(resolver.resolve_model_names("same"), vec!["same"]);
    }

    #[test]
    fn test_channel_route_pins() {
        let channels = vec![channel("mychannel")];
        let decision = resolve_channel_route("mychannel/gpt-4", &channels);
        assert_eq!(decision.pinned.unwrap().name, "mychannel");
        assert_eq!(decision.model, "gpt-4");
    }

    #[test]
    fn test_channel_route_longest_name_wins() {
        let channels = vec![channel("mychannel"), channel("mychannel-pro")];
        let decision = resolve_channel_route("mychannel-pro/gpt-4", &channels);
        assert_eq!(decision.pinned.unwrap().name, "mychannel-pro");
        assert_eq!(decision.model, "gpt-4");

        let decision = resolve_channel_route("mychannel/gpt-4", &channels);
        assert_eq!(decision.pinned.unwrap().name, "mychannel");
    }

    #[test]
    fn test_channel_route_no_slash_passes_through() {
        let channels = vec![channel("mychannel")];
        let decision = resolve_channel_route("gpt-4", &channels);
        assert!(decision.pinned.is_none());
        assert_eq!(decision.model, "gpt-4");
    }

    #[test]
    fn test_channel_route_unknown_prefix_passes_through() {
        let channels = vec![channel("mychannel")];
        let decision = resolve_channel_route("meta-llama/Llama-3-70b", &channels);
        assert!(decision.pinned.is_none());
        assert_eq!(decision.model, "meta-llama/Llama-3-70b");
    }

    #[test]
    fn test_channel_route_requires_separator_after_name() {
        let channels = vec![channel("my")];
        let decision = resolve_channel_route("mychannel/gpt-4", &channels);
        assert!(decision.pinned.is_none());
        assert_eq!(decision.model, "mychannel/gpt-4");
    }

    #[test]
    fn test_channel_route_empty_model_does_not_pin() {
        let channels = vec![channel("mychannel")];
        let decision = resolve_channel_route("mychannel/", &channels);
        assert!(decision.pinned.is_none());
    }
}
