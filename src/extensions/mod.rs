//! Extension protocol, registry, per-agent state and installer.

pub mod builtin;
pub mod discovery;
pub mod installer;
pub mod registry;
pub mod state;

pub use discovery::{DiscoveredEntry, DiscoverySource, StaticDiscovery};
pub use installer::{InstallReport, PipelinedNode, install_extensions};
pub use registry::{ExtensionConstructor, ExtensionRegistry};
pub use state::{ExtensionState, Helpers, get_state};

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::agent::ExtensibleAgent;
use crate::error::ExtensionError;

/// A named, independently installable unit of behavior.
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    /// Attach this extension to `agent`, typically by adding pipeline stages
    /// or helpers to `get_state(agent)`.
    fn install(&self, agent: &dyn ExtensibleAgent) -> Result<(), ExtensionError>;
}

impl std::fmt::Debug for dyn Extension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extension")
            .field("name", &self.name())
            .finish()
    }
}

type Factory = Box<dyn FnOnce() -> Result<Arc<dyn Extension>, ExtensionError> + Send>;

/// Something the installer can turn into an extension.
pub enum ExtensionSpec {
    /// An already constructed extension.
    Instance(Arc<dyn Extension>),
    /// A type constructed with its `Default` impl.
    Class {
        type_name: &'static str,
        construct: fn() -> Arc<dyn Extension>,
    },
    /// A zero-argument factory.
    Factory(Factory),
    /// A registry entry, constructed with `config`.
    Named {
        name: String,
        config: serde_json::Value,
    },
}

impl ExtensionSpec {
    pub fn instance(extension: impl Extension + 'static) -> Self {
        Self::Instance(Arc::new(extension))
    }

    pub fn class<T>() -> Self
    where
        T: Extension + Default + 'static,
    {
        fn construct<T: Extension + Default + 'static>() -> Arc<dyn Extension> {
            Arc::new(T::default())
        }
        Self::Class {
            type_name: std::any::type_name::<T>(),
            construct: construct::<T>,
        }
    }

    pub fn factory<F>(factory: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn Extension>, ExtensionError> + Send + 'static,
    {
        Self::Factory(Box::new(factory))
    }

    pub fn named(name: impl Into<String>, config: serde_json::Value) -> Self {
        Self::Named {
            name: name.into(),
            config,
        }
    }

    /// Short description for log output.
    pub fn describe(&self) -> String {
        match self {
            Self::Instance(ext) => format!("instance:{}", ext.name()),
            Self::Class { type_name, .. } => format!("class:{type_name}"),
            Self::Factory(_) => "factory".to_string(),
            Self::Named { name, .. } => format!("named:{name}"),
        }
    }
}

impl std::fmt::Debug for ExtensionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

impl From<Arc<dyn Extension>> for ExtensionSpec {
    fn from(extension: Arc<dyn Extension>) -> Self {
        Self::Instance(extension)
    }
}

/// Deserialize an extension's construction config. `null` means defaults.
pub fn parse_config<T>(name: &str, config: &serde_json::Value) -> Result<T, ExtensionError>
where
    T: DeserializeOwned + Default,
{
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone()).map_err(|e| ExtensionError::InvalidConfig {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContentFilterConfig;

    #[derive(Default)]
    struct Noop;

    impl Extension for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn install(&self, _agent: &dyn ExtensibleAgent) -> Result<(), ExtensionError> {
            Ok(())
        }
    }

    #[test]
    fn test_spec_descriptions() {
        assert_eq!(ExtensionSpec::instance(Noop).describe(), "instance:noop");
        assert!(ExtensionSpec::class::<Noop>().describe().ends_with("Noop"));
        assert_eq!(
            ExtensionSpec::factory(|| Ok(Arc::new(Noop) as Arc<dyn Extension>)).describe(),
            "factory"
        );
        assert_eq!(
            ExtensionSpec::named("rpc", serde_json::Value::Null).describe(),
            "named:rpc"
        );
    }

    #[test]
    fn test_parse_config_defaults_on_null() {
        let config: ContentFilterConfig = parse_config("content_filter", &serde_json::Value::Null).unwrap();
        assert_eq!(config, ContentFilterConfig::default());
    }

    #[test]
    fn test_parse_config_partial_and_invalid() {
        let config: ContentFilterConfig =
            parse_config("content_filter", &serde_json::json!({"replacement": "X"})).unwrap();
        assert_eq!(config.replacement, "X");
        assert_eq!(config.terms, vec!["fail".to_string()]);

        let err = parse_config::<ContentFilterConfig>("content_filter", &serde_json::json!({"terms": 3}))
            .unwrap_err();
        assert!(matches!(err, ExtensionError::InvalidConfig { .. }));
    }
}
