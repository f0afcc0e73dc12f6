//! Configuration surface: `ProviderConfig`, `AdapterConfig`, and loaders
//! for both a YAML file and environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::provider::ProviderKind;

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_max_retries() -> u32 {
    3
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u64 {
    4096
}

/// Configuration for a single provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Which provider family this targets
    pub provider: ProviderKind,
    /// Model name; defaults to the provider's documented default if absent
    #[serde(default)]
    pub model: Option<String>,
    /// API credential
    pub api_key: String,
    /// Override base URL (for self-hosted or compatible deployments)
    #[serde(default)]
    pub base_url: Option<String>,
    /// Request timeout
    #[serde(default = "default_timeout", with = "humantime_secs")]
    pub timeout: Duration,
    /// Max retry attempts within a single candidate
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Default sampling temperature when a request doesn't override it
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Default max_tokens when a request doesn't override it
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    /// Cost per 1000 tokens, used by `metrics()`'s cost estimate.
    #[serde(default)]
    pub cost_per_1k: Option<f64>,
}

impl ProviderConfig {
    /// The model this config resolves to: the explicit override, or the
    /// provider's documented default.
    pub fn resolved_model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    fn validate(&self, label: &str) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::config_invalid(format!(
                "{label}: missing credential"
            )));
        }
        Ok(())
    }
}

mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Top-level adapter configuration: a primary provider, ordered fallbacks,
/// an optional cheap budget provider, and routing hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterConfig {
    /// The provider tried first
    pub primary: ProviderConfig,
    /// Providers tried in order after the primary (or first, under `costBased`)
    #[serde(default)]
    pub fallback: Vec<ProviderConfig>,
    /// A cheap provider consulted first under `costBased`
    #[serde(default)]
    pub budget: Option<ProviderConfig>,
    /// Hint: MAY influence `automatic` ordering by observed load
    #[serde(default)]
    pub load_balancing: bool,
    /// When true, `automatic` MAY consult the cost table to re-order
    #[serde(default = "default_true")]
    pub cost_optimization: bool,
    /// How often the rate-limiter sweeper runs
    #[serde(default = "default_cleanup_interval", with = "humantime_secs")]
    pub cleanup_interval: Duration,
    /// Rate applied to rate-limit keys with no explicit override
    #[serde(default = "default_rate")]
    pub default_rate: f64,
    /// Burst applied to rate-limit keys with no explicit override
    #[serde(default = "default_burst")]
    pub default_burst: f64,
}

fn default_true() -> bool {
    true
}
fn default_cleanup_interval() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_rate() -> f64 {
    10.0
}
fn default_burst() -> f64 {
    20.0
}

impl AdapterConfig {
    /// Validate the configuration: the primary must have a credential and a
    /// supported provider kind; fallbacks/budget that fail validation are
    /// reported with their position so the caller can fix the right entry.
    /// `default_rate`/`default_burst` must be strictly positive — the
    /// limiter divides by the rate when computing a reservation's delay, and
    /// a zero or negative value would produce an infinite or nonsensical
    /// wait instead of a clean `ConfigInvalid`.
    pub fn validate(&self) -> Result<()> {
        self.primary.validate("primary")?;
        for (i, fb) in self.fallback.iter().enumerate() {
            fb.validate(&format!("fallback[{i}]"))?;
        }
        if let Some(b) = &self.budget {
            b.validate("budget")?;
        }
        if !(self.default_rate > 0.0) {
            return Err(Error::config_invalid("default_rate must be positive"));
        }
        if !(self.default_burst > 0.0) {
            return Err(Error::config_invalid("default_burst must be positive"));
        }
        Ok(())
    }

    /// Load from a YAML file. Unknown keys are rejected by `serde`'s
    /// `deny_unknown_fields` rather than silently ignored.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml_ng::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables prefixed `LLM_PRIMARY_*`,
    /// `LLM_FALLBACK_<n>_*`, `LLM_BUDGET_*`.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Testable variant of `from_env` taking an injectable lookup function.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String> + Copy) -> Result<Self> {
        let primary = provider_config_from_env(lookup, "LLM_PRIMARY")?
            .ok_or_else(|| Error::config_invalid("LLM_PRIMARY_PROVIDER is required"))?;

        let mut fallback = Vec::new();
        for n in 0.. {
            let prefix = format!("LLM_FALLBACK_{n}");
            match provider_config_from_env(lookup, &prefix)? {
                Some(cfg) => fallback.push(cfg),
                None => break,
            }
        }

        let budget = provider_config_from_env(lookup, "LLM_BUDGET")?;

        let config = Self {
            primary,
            fallback,
            budget,
            load_balancing: false,
            cost_optimization: true,
            cleanup_interval: default_cleanup_interval(),
            default_rate: default_rate(),
            default_burst: default_burst(),
        };
        config.validate()?;
        Ok(config)
    }
}

fn provider_config_from_env(
    lookup: impl Fn(&str) -> Option<String>,
    prefix: &str,
) -> Result<Option<ProviderConfig>> {
    let Some(provider_str) = lookup(&format!("{prefix}_PROVIDER")) else {
        return Ok(None);
    };

    let provider = match provider_str.to_lowercase().as_str() {
        "openai" => ProviderKind::OpenAi,
        "anthropic" => ProviderKind::Anthropic,
        "openrouter" => ProviderKind::OpenRouter,
        "qwen" => ProviderKind::Qwen,
        other => {
            return Err(Error::config_invalid(format!(
                "{prefix}_PROVIDER: unsupported provider '{other}'"
            )))
        }
    };

    let api_key = lookup(&format!("{prefix}_API_KEY"))
        .ok_or_else(|| Error::config_invalid(format!("{prefix}_API_KEY is required")))?;

    Ok(Some(ProviderConfig {
        provider,
        model: lookup(&format!("{prefix}_MODEL")),
        api_key,
        base_url: lookup(&format!("{prefix}_BASE_URL")),
        timeout: lookup(&format!("{prefix}_TIMEOUT_SECS"))
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(default_timeout),
        max_retries: lookup(&format!("{prefix}_MAX_RETRIES"))
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_max_retries),
        temperature: lookup(&format!("{prefix}_TEMPERATURE"))
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_temperature),
        max_tokens: lookup(&format!("{prefix}_MAX_TOKENS"))
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_max_tokens),
        cost_per_1k: lookup(&format!("{prefix}_COST_PER_1K")).and_then(|v| v.parse().ok()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn from_env_reads_primary_and_fallbacks() {
        let env = env_map(&[
            ("LLM_PRIMARY_PROVIDER", "openai"),
            ("LLM_PRIMARY_API_KEY", "sk-primary"),
            ("LLM_FALLBACK_0_PROVIDER", "anthropic"),
            ("LLM_FALLBACK_0_API_KEY", "sk-fallback"),
        ]);
        let config = AdapterConfig::from_env_with(|k| env.get(k).cloned()).expect("should load");
        assert_eq!(config.primary.provider, ProviderKind::OpenAi);
        assert_eq!(config.fallback.len(), 1);
        assert_eq!(config.fallback[0].provider, ProviderKind::Anthropic);
        assert!(config.budget.is_none());
    }

    #[test]
    fn from_env_requires_primary() {
        let env = env_map(&[]);
        let err = AdapterConfig::from_env_with(|k| env.get(k).cloned()).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn from_env_rejects_missing_credential() {
        let env = env_map(&[("LLM_PRIMARY_PROVIDER", "openai")]);
        let err = AdapterConfig::from_env_with(|k| env.get(k).cloned()).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn resolved_model_falls_back_to_provider_default() {
        let cfg = ProviderConfig {
            provider: ProviderKind::Anthropic,
            model: None,
            api_key: "k".into(),
            base_url: None,
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            cost_per_1k: None,
        };
        assert_eq!(cfg.resolved_model(), "claude-3-5-sonnet-20241022");
    }

    fn provider_config(provider: ProviderKind) -> ProviderConfig {
        ProviderConfig {
            provider,
            model: None,
            api_key: "k".into(),
            base_url: None,
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            cost_per_1k: None,
        }
    }

    #[test]
    fn validate_rejects_non_positive_rate_or_burst() {
        let base = AdapterConfig {
            primary: provider_config(ProviderKind::OpenAi),
            fallback: vec![],
            budget: None,
            load_balancing: false,
            cost_optimization: true,
            cleanup_interval: default_cleanup_interval(),
            default_rate: default_rate(),
            default_burst: default_burst(),
        };
        assert!(base.validate().is_ok());

        let mut zero_rate = base.clone();
        zero_rate.default_rate = 0.0;
        assert!(matches!(zero_rate.validate(), Err(Error::ConfigInvalid(_))));

        let mut negative_burst = base.clone();
        negative_burst.default_burst = -1.0;
        assert!(matches!(negative_burst.validate(), Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn yaml_round_trip_rejects_unknown_fields() {
        let yaml = r#"
primary:
  provider: openai
  api_key: sk-test
  bogus_field: true
"#;
        let result: std::result::Result<AdapterConfig, _> = serde_yaml_ng::from_str(yaml);
        assert!(result.is_err());
    }
}
