use super::envelope::Endpoint;
use super::router::{resolve_channel_route, ModelResolver};
use crate::config::{ApiFormat, Channel, GatewayConfig, Token, VisibilityMode};
use crate::types::{GatewayError, Result};
use rand::Rng;

/// A channel to try and the model name to send to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub channel: Channel,
    pub model: String,
}

pub fn filter_allowed_channels(channels: &[Channel], token: &Token) -> Vec<Channel> {
    match &token.allowed_channels {
        Some(allowed) => channels
            .iter()
            .filter(|c| allowed.iter().any(|id| *id == c.id))
            .cloned()
            .collect(),
        None => channels.to_vec(),
    }
}

pub fn supports_model(channel: &Channel, model: &str) -> bool {
    channel.model(model).is_some()
}

pub fn supports_model_from_set(channel: &Channel, models: &[String]) -> bool {
    models.iter().any(|m| supports_model(channel, m))
}

pub fn supports_shared_model(channel: &Channel, model: &str) -> bool {
    channel
        .model(model)
        .map(|m| m.is_shared_visible())
        .unwrap_or(false)
}

pub fn supports_shared_model_from_set(channel: &Channel, models: &[String]) -> bool {
    models.iter().any(|m| supports_shared_model(channel, m))
}

/// Anthropic channels have nothing to proxy non-chat paths to.
pub fn restrict_to_endpoint(channels: Vec<Channel>, endpoint: &Endpoint) -> Vec<Channel> {
    if endpoint.kind.is_chat() {
        return channels;
    }
    channels
        .into_iter()
        .filter(|c| c.api_format != ApiFormat::Anthropic)
        .collect()
}

/// Weighted sampling without replacement: a full try-order in which a
/// channel with weight `w` comes first with probability `w / total`.
pub fn create_weighted_order<T: Clone, F>(items: &[T], weight: F) -> Vec<T>
where
    F: Fn(&T) -> u64,
{
    let mut rng = rand::thread_rng();
    let mut pool: Vec<T> = items.to_vec();
    let mut ordered = Vec::with_capacity(pool.len());

    while !pool.is_empty() {
        let total = pool
            .iter()
            .fold(0u64, |acc, item| acc.saturating_add(weight(item).max(1)));
        let mut remainder = rng.gen::<f64>() * total as f64;

        let mut picked = pool.len() - 1;
        for (idx, item) in pool.iter().enumerate() {
            remainder -= weight(item).max(1) as f64;
            if remainder <= 0.0 {
                picked = idx;
                break;
            }
        }

        ordered.push(pool.remove(picked));
    }

    ordered
}

pub struct ChannelSelector {
    config: GatewayConfig,
    resolver: ModelResolver,
}

impl ChannelSelector {
    pub fn new(config: GatewayConfig, resolver: ModelResolver) -> Self {
        Self { config, resolver }
    }

    /// Whether end-user tokens only see models marked shared.
    pub fn shared_only(&self, token: &Token) -> bool {
        self.config.visibility_mode == VisibilityMode::Shared && token.is_user_token()
    }

    /// Channels this token may use on this endpoint.
    pub fn usable_channels(
        &self,
        channels: &[Channel],
        token: &Token,
        endpoint: &Endpoint,
    ) -> Vec<Channel> {
        restrict_to_endpoint(filter_allowed_channels(channels, token), endpoint)
    }

    /// Distinct model ids this token can see across its allowed channels.
    pub fn visible_models(&self, channels: &[Channel], token: &Token) -> Vec<String> {
        let shared_only = self.shared_only(token);
        let mut ids: Vec<String> = filter_allowed_channels(channels, token)
            .iter()
            .flat_map(|c| c.models.iter())
            .filter(|m| !shared_only || m.is_shared_visible())
            .map(|m| m.id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Candidate channels for `requested_model`, in weighted try-order.
    pub fn select(
        &self,
        channels: &[Channel],
        token: &Token,
        endpoint: &Endpoint,
        requested_model: &str,
    ) -> Result<Vec<Candidate>> {
        let usable = self.usable_channels(channels, token, endpoint);
        if usable.is_empty() {
            return Err(GatewayError::NoAvailableChannels);
        }

        let route = resolve_channel_route(requested_model, &usable);
        let names = self.resolver.resolve_model_names(&route.model);

        let pool: Vec<&Channel> = match route.pinned {
            Some(channel) => vec![channel],
            None => usable.iter().collect(),
        };

        let supporting: Vec<&Channel> = pool
            .into_iter()
            .filter(|c| supports_model_from_set(c, &names))
            .collect();
        if supporting.is_empty() {
            return Err(GatewayError::ModelNotFound(requested_model.to_string()));
        }

        let shared_only = self.shared_only(token);
        let visible: Vec<&Channel> = if shared_only {
            supporting
                .into_iter()
                .filter(|c| supports_shared_model_from_set(c, &names))
                .collect()
        } else {
            supporting
        };
        if visible.is_empty() {
            return Err(GatewayError::ModelNotShared(requested_model.to_string()));
        }

        let candidates: Vec<Candidate> = visible
            .into_iter()
            .filter_map(|channel| {
                let model = names.iter().find(|name| {
                    if shared_only {
                        supports_shared_model(channel, name)
                    } else {
                        supports_model(channel, name)
                    }
                })?;
                Some(Candidate {
                    channel: channel.clone(),
                    model: model.clone(),
                })
            })
            .collect();

        let ordered = create_weighted_order(&candidates, |c| c.channel.effective_weight());

        tracing::debug!(
            model = %requested_model,
            order = ?ordered.iter().map(|c| c.channel.name.as_str()).collect::<Vec<_>>(),
            "Channel try-order"
        );

        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelModel, ChannelStatus};
    use crate::proxy::envelope::EndpointKind;
    use std::collections::{HashMap, HashSet};

    fn channel(id: &str, format: ApiFormat, weight: i64, models: &[&str]) -> Channel {
        Channel {
            id: id.to_string(),
            name: format!("ch-{}", id),
            base_url: "https://api.example.com".to_string(),
            api_keys: vec!["k".to_string()],
            weight,
            status: ChannelStatus::Active,
            api_format: format,
            models: models.iter().map(|m| ChannelModel::new(*m)).collect(),
            custom_headers: HashMap::new(),
        }
    }

    fn token(user: bool, allowed: Option<Vec<&str>>) -> Token {
        Token {
            id: "t".to_string(),
            name: "t".to_string(),
            key: "sk".to_string(),
            user_id: user.then(|| "u1".to_string()),
            allowed_channels: allowed.map(|a| a.into_iter().map(String::from).collect()),
            quota: None,
        }
    }

    fn chat() -> Endpoint {
        Endpoint::new(EndpointKind::ChatCompletions, "/v1/chat/completions", None)
    }

    fn selector(mode: VisibilityMode, aliases: &[(&str, &str)]) -> ChannelSelector {
        let config = GatewayConfig {
            visibility_mode: mode,
            ..GatewayConfig::default()
        };
        let aliases = aliases
            .iter()
            .map(|(a, c)| (a.to_string(), c.to_string()))
            .collect();
        ChannelSelector::new(config, ModelResolver::new(aliases))
    }

    #[test]
    fn test_weighted_order_is_permutation() {
        let channels: Vec<Channel> = (0..8)
            .map(|i| channel(&i.to_string(), ApiFormat::OpenAI, i as i64 - 2, &["m"]))
            .collect();

        for _ in 0..50 {
            let ordered = create_weighted_order(&channels, Channel::effective_weight);
            assert_eq!(ordered.len(), channels.len());
            let ids: HashSet<&str> = ordered.iter().map(|c| c.id.as_str()).collect();
            assert_eq!(ids.len(), channels.len());
        }
    }

    #[test]
    fn test_weighted_order_empty() {
        let ordered = create_weighted_order(&Vec::<Channel>::new(), Channel::effective_weight);
        assert!(ordered.is_empty());
    }

    #[test]
    fn test_weighted_order_first_pick_frequency() {
        let channels = vec![
            channel("a", ApiFormat::OpenAI, 1, &["m"]),
            channel("b", ApiFormat::OpenAI, 3, &["m"]),
        ];
        let trials = 20_000;
        let mut b_first = 0;
        for _ in 0..trials {
            if create_weighted_order(&channels, Channel::effective_weight)[0].id == "b" {
                b_first += 1;
            }
        }
        let ratio = b_first as f64 / trials as f64;
        assert!((ratio - 0.75).abs() < 0.03, "ratio was {}", ratio);
    }

    #[test]
    fn test_weighted_order_huge_weights_do_not_overflow() {
        let channels = vec![
            channel("a", ApiFormat::OpenAI, i64::MAX, &["m"]),
            channel("b", ApiFormat::OpenAI, i64::MAX, &["m"]),
            channel("c", ApiFormat::OpenAI, i64::MAX, &["m"]),
        ];
        let ordered = create_weighted_order(&channels, Channel::effective_weight);
        let ids: HashSet<&str> = ordered.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_zero_weight_still_selectable() {
        let channels = vec![
            channel("a", ApiFormat::OpenAI, 0, &["m"]),
            channel("b", ApiFormat::OpenAI, -4, &["m"]),
        ];
        let mut a_first = 0;
        for _ in 0..2_000 {
            if create_weighted_order(&channels, Channel::effective_weight)[0].id == "a" {
                a_first += 1;
            }
        }
        assert!(a_first > 800 && a_first < 1200, "a_first was {}", a_first);
    }

    #[test]
    fn test_filter_allowed_channels() {
        let channels = vec![
            channel("1", ApiFormat::OpenAI, 1, &["m"]),
            channel("2", ApiFormat::OpenAI, 1, &["m"]),
        ];
        assert_eq!(filter_allowed_channels(&channels, &token(false, None)).len(), 2);
        let allowed = filter_allowed_channels(&channels, &token(false, Some(vec!["2"])));
        assert_eq!(allowed.len(), 1);
        assert_eq!(allowed[0].id, "2");
    }

    #[test]
    fn test_shared_predicates() {
        let mut ch = channel("1", ApiFormat::OpenAI, 1, &["a", "b"]);
        ch.models[1].shared = Some(false);
        assert!(supports_shared_model(&ch, "a"));
        assert!(!supports_shared_model(&ch, "b"));
        assert!(supports_model(&ch, "b"));
        assert!(supports_model_from_set(&ch, &["x".into(), "b".into()]));
        assert!(!supports_shared_model_from_set(&ch, &["x".into(), "b".into()]));
    }

    #[test]
    fn test_non_chat_endpoint_excludes_anthropic() {
        let channels = vec![
            channel("1", ApiFormat::OpenAI, 1, &["m"]),
            channel("2", ApiFormat::Anthropic, 1, &["m"]),
            channel("3", ApiFormat::Custom, 1, &["m"]),
        ];
        let embeddings = Endpoint::new(EndpointKind::Passthrough, "/v1/embeddings", None);
        let kept = restrict_to_endpoint(channels.clone(), &embeddings);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|c| c.api_format != ApiFormat::Anthropic));

        assert_eq!(restrict_to_endpoint(channels, &chat()).len(), 3);
    }

    #[test]
    fn test_select_model_not_found() {
        let channels = vec![channel("1", ApiFormat::OpenAI, 1, &["gpt-4"])];
        let err = selector(VisibilityMode::All, &[])
            .select(&channels, &token(false, None), &chat(), "claude")
            .unwrap_err();
        assert!(matches!(err, GatewayError::ModelNotFound(_)));
    }

    #[test]
    fn test_select_no_available_channels() {
        let channels = vec![channel("1", ApiFormat::Anthropic, 1, &["m"])];
        let embeddings = Endpoint::new(EndpointKind::Passthrough, "/v1/embeddings", None);
        let err = selector(VisibilityMode::All, &[])
            .select(&channels, &token(false, None), &embeddings, "m")
            .unwrap_err();
        assert!(matches!(err, GatewayError::NoAvailableChannels));
    }

    #[test]
    fn test_select_model_not_shared_for_user_tokens() {
        let mut ch = channel("1", ApiFormat::OpenAI, 1, &["gpt-4"]);
        ch.models[0].shared = Some(false);
        let channels = vec![ch];
        let sel = selector(VisibilityMode::Shared, &[]);

        let err = sel
            .select(&channels, &token(true, None), &chat(), "gpt-4")
            .unwrap_err();
        assert!(matches!(err, GatewayError::ModelNotShared(_)));

        // Service tokens are not subject to the shared filter.
        assert_eq!(
            sel.select(&channels, &token(false, None), &chat(), "gpt-4")
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_select_resolves_alias_per_channel() {
        let channels = vec![
            channel("1", ApiFormat::OpenAI, 1, &["gpt4"]),
            channel("2", ApiFormat::OpenAI, 1, &["gpt-4"]),
        ];
        let candidates = selector(VisibilityMode::All, &[("gpt4", "gpt-4")])
            .select(&channels, &token(false, None), &chat(), "gpt4")
            .unwrap();
        assert_eq!(candidates.len(), 2);
        for c in candidates {
            match c.channel.id.as_str() {
                "1" => assert_eq!(c.model, "gpt4"),
                "2" => assert_eq!(c.model, "gpt-4"),
                other => panic!("unexpected channel {}", other),
            }
        }
    }

    #[test]
    fn test_select_pinned_channel() {
        let channels = vec![
            channel("1", ApiFormat::OpenAI, 1, &["gpt-4"]),
            channel("2", ApiFormat::OpenAI, 1, &["gpt-4"]),
        ];
        let candidates = selector(VisibilityMode::All, &[])
            .select(&channels, &token(false, None), &chat(), "ch-2/gpt-4")
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].channel.id, "2");
        assert_eq!(candidates[0].model, "gpt-4");
    }

    #[test]
    fn test_visible_models() {
        let mut first = channel("1", ApiFormat::OpenAI, 1, &["gpt-4", "private"]);
        first.models[1].shared = Some(false);
        let channels = vec![first, channel("2", ApiFormat::Anthropic, 1, &["gpt-4", "claude"])];
        let sel = selector(VisibilityMode::Shared, &[]);

        assert_eq!(
            sel.visible_models(&channels, &token(false, None)),
            vec!["claude", "gpt-4", "private"]
        );
        assert_eq!(
            sel.visible_models(&channels, &token(true, None)),
            vec!["claude", "gpt-4"]
        );
        assert_eq!(
            sel.visible_models(&channels, &token(false, Some(vec!["1"]))),
            vec!["gpt-4", "private"]
        );
    }

    #[test]
    fn test_select_pinned_channel_without_model() {
        let channels = vec![
            channel("1", ApiFormat::OpenAI, 1, &["gpt-4"]),
            channel("2", ApiFormat::OpenAI, 1, &["other"]),
        ];
        let err = selector(VisibilityMode::All, &[])
            .select(&channels, &token(false, None), &chat(), "ch-2/gpt-4")
            .unwrap_err();
        assert!(matches!(err, GatewayError::ModelNotFound(_)));
    }

    #[test]
    fn test_select_respects_allow_list() {
        let channels = vec![
            channel("1", ApiFormat::OpenAI, 1, &["gpt-4"]),
            channel("2", ApiFormat::OpenAI, 1, &["gpt-4"]),
        ];
        let candidates = selector(VisibilityMode::All, &[])
            .select(&channels, &token(false, Some(vec!["1"])), &chat(), "gpt-4")
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].channel.id, "1");
    }
}
