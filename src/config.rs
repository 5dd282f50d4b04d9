//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Default interval between attempts to flush deferred RPC registrations.
pub const DEFAULT_RPC_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Default discovery group scanned for externally provided extensions.
pub const DEFAULT_DISCOVERY_GROUP: &str = "agent.extensions";

/// Runtime configuration for the extension layer.
#[derive(Debug, Clone)]
pub struct ExtensionsConfig {
    /// Interval between flush attempts while RPC registrations are pending.
    pub rpc_retry_interval: Duration,
    /// Payload field that receives a generated identifier (None disables it).
    pub rpc_id_field: Option<String>,
    /// Group name passed to discovery sources.
    pub discovery_group: String,
    /// Defaults for the built-in content filter.
    pub content_filter: ContentFilterConfig,
}

/// Configuration for the built-in content filter.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct ContentFilterConfig {
    /// Case-insensitive terms that trigger replacement.
    pub terms: Vec<String>,
    /// Text substituted for a matching fragment.
    pub replacement: String,
}

impl Default for ContentFilterConfig {
    fn default() -> Self {
        Self {
            terms: vec!["fail".to_string()],
            replacement: "CONTENT FILTERED".to_string(),
        }
    }
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            rpc_retry_interval: DEFAULT_RPC_RETRY_INTERVAL,
            rpc_id_field: Some("id".to_string()),
            discovery_group: DEFAULT_DISCOVERY_GROUP.to_string(),
            content_filter: ContentFilterConfig::default(),
        }
    }
}

impl ExtensionsConfig {
    /// Build configuration from `AGENT_EXT_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("AGENT_EXT_RPC_RETRY_MS") {
            let millis: u64 = raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: "AGENT_EXT_RPC_RETRY_MS".to_string(),
                message: format!("{e}"),
            })?;
            if millis == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "AGENT_EXT_RPC_RETRY_MS".to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
            config.rpc_retry_interval = Duration::from_millis(millis);
        }

        if let Some(raw) = lookup("AGENT_EXT_RPC_ID_FIELD") {
            let field = raw.trim();
            config.rpc_id_field = (!field.is_empty()).then(|| field.to_string());
        }

        if let Some(raw) = lookup("AGENT_EXT_DISCOVERY_GROUP") {
            let group = raw.trim();
            if group.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "AGENT_EXT_DISCOVERY_GROUP".to_string(),
                    message: "must not be empty".to_string(),
                });
            }
            config.discovery_group = group.to_string();
        }

        if let Some(raw) = lookup("AGENT_EXT_FILTER_TERMS") {
            let terms: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            if terms.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "AGENT_EXT_FILTER_TERMS".to_string(),
                    message: "requires at least one term".to_string(),
                });
            }
            config.content_filter.terms = terms;
        }

        if let Some(raw) = lookup("AGENT_EXT_FILTER_REPLACEMENT") {
            config.content_filter.replacement = raw;
        }

        Ok(config)
    }
}
