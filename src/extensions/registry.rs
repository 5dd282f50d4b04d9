//! Extension registry.
//!
//! Maps unique extension names to constructors. The host owns the registry
//! and passes it to discovery and the installer.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::error::{ExtensionError, RegistryError};
use crate::extensions::Extension;
use crate::extensions::builtin;
use crate::extensions::discovery::DiscoverySource;
use crate::pipeline::isolate::panic_message;

/// Builds an extension from its JSON construction config.
pub type ExtensionConstructor =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Extension>, ExtensionError> + Send + Sync>;

/// Registry of extension constructors.
#[derive(Default)]
pub struct ExtensionRegistry {
    constructors: RwLock<BTreeMap<String, ExtensionConstructor>>,
}

impl ExtensionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in extensions.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        builtin::register_all(&registry);
        registry
    }

    /// Register `constructor` under `name`.
    pub fn register<C>(&self, name: impl Into<String>, constructor: C) -> Result<(), RegistryError>
    where
        C: Fn(&serde_json::Value) -> Result<Arc<dyn Extension>, ExtensionError>
            + Send
            + Sync
            + 'static,
    {
        self.register_constructor(name, Arc::new(constructor))
    }

    /// Register an already shared constructor under `name`.
    pub fn register_constructor(
        &self,
        name: impl Into<String>,
        constructor: ExtensionConstructor,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let mut constructors = self
            .constructors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if constructors.contains_key(&name) {
            return Err(RegistryError::DuplicateName { name });
        }
        debug!(extension = %name, "Registered extension");
        constructors.insert(name, constructor);
        Ok(())
    }

    /// Instantiate the extension registered under `name`.
    pub fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn Extension>, RegistryError> {
        let constructor = self
            .constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownExtension {
                name: name.to_string(),
            })?;

        constructor(config).map_err(|source| RegistryError::Construction {
            name: name.to_string(),
            source,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load every entry `source` offers for `group`.
    ///
    /// A failing source, a failing loader, or a name that is already taken
    /// is logged and skipped. Returns the names that were added.
    pub fn discover(&self, source: &dyn DiscoverySource, group: &str) -> Vec<String> {
        let entries = match panic::catch_unwind(AssertUnwindSafe(|| source.entries(group))) {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                warn!(group = %group, error = %e, "Extension discovery failed");
                return Vec::new();
            }
            Err(payload) => {
                warn!(
                    group = %group,
                    panic = %panic_message(payload.as_ref()),
                    "Extension discovery panicked"
                );
                return Vec::new();
            }
        };

        let mut added = Vec::new();
        for entry in entries {
            let name = entry.name.clone();
            let constructor = match panic::catch_unwind(AssertUnwindSafe(|| entry.load())) {
                Ok(Ok(constructor)) => constructor,
                Ok(Err(e)) => {
                    warn!(group = %group, entry = %name, error = %e, "Failed to load extension entry");
                    continue;
                }
                Err(payload) => {
                    warn!(
                        group = %group,
                        entry = %name,
                        panic = %panic_message(payload.as_ref()),
                        "Extension entry loader panicked"
                    );
                    continue;
                }
            };
            match self.register_constructor(name.clone(), constructor) {
                Ok(()) => added.push(name),
                Err(e) => {
                    warn!(group = %group, entry = %name, error = %e, "Skipped discovered extension");
                }
            }
        }

        info!(group = %group, count = added.len(), "Extension discovery complete");
        added
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("names", &self.names())
            .finish()
    }
}
