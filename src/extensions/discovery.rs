//! Discovery of externally provided extensions.

use std::collections::HashMap;
use std::sync::Arc;

use crate::extensions::registry::ExtensionConstructor;

type Loader = Arc<dyn Fn() -> anyhow::Result<ExtensionConstructor> + Send + Sync>;

/// One named extension offered by a discovery source.
pub struct DiscoveredEntry {
    pub name: String,
    loader: Loader,
}

impl DiscoveredEntry {
    pub fn new<L>(name: impl Into<String>, loader: L) -> Self
    where
        L: Fn() -> anyhow::Result<ExtensionConstructor> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            loader: Arc::new(loader),
        }
    }

    /// Resolve the entry to a constructor.
    pub fn load(&self) -> anyhow::Result<ExtensionConstructor> {
        (self.loader)()
    }
}

impl std::fmt::Debug for DiscoveredEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveredEntry")
            .field("name", &self.name)
            .finish()
    }
}

/// A source of named extension entries, grouped by name.
pub trait DiscoverySource: Send + Sync {
    fn entries(&self, group: &str) -> anyhow::Result<Vec<DiscoveredEntry>>;
}

/// In-process discovery source populated by the host at startup.
#[derive(Default)]
pub struct StaticDiscovery {
    groups: HashMap<String, Vec<(String, Loader)>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry<L>(mut self, group: &str, name: &str, loader: L) -> Self
    where
        L: Fn() -> anyhow::Result<ExtensionConstructor> + Send + Sync + 'static,
    {
        self.groups
            .entry(group.to_string())
            .or_default()
            .push((name.to_string(), Arc::new(loader)));
        self
    }
}

impl DiscoverySource for StaticDiscovery {
    fn entries(&self, group: &str) -> anyhow::Result<Vec<DiscoveredEntry>> {
        Ok(self
            .groups
            .get(group)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(name, loader)| DiscoveredEntry {
                        name: name.clone(),
                        loader: Arc::clone(loader),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
