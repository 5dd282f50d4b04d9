//! Per-agent extension state.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use crate::agent::ExtensibleAgent;
use crate::chunk::Chunk;
use crate::extensions::Extension;
use crate::extensions::installer::PipelinedNode;
use crate::pipeline::Pipeline;

type HelperSlot = Arc<dyn Any + Send + Sync>;

/// Named helper objects extensions expose to the host and each other.
#[derive(Default)]
pub struct Helpers {
    slots: RwLock<HashMap<String, HelperSlot>>,
}

impl Helpers {
    /// Store `helper` under `name`, replacing any previous helper.
    pub fn insert<T>(&self, name: impl Into<String>, helper: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), helper);
    }

    /// Return the helper under `name`, inserting one built by `init` if the
    /// slot is empty.
    ///
    /// Returns `None` when the slot holds a helper of another type.
    pub fn get_or_insert_with<T, I>(&self, name: &str, init: I) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
        I: FnOnce() -> Arc<T>,
    {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = slots
            .entry(name.to_string())
            .or_insert_with(|| init() as HelperSlot);
        Arc::clone(slot).downcast::<T>().ok()
    }

    /// The helper under `name`, if present and of type `T`.
    pub fn get<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let slot = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()?;
        slot.downcast::<T>().ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Mutable extension state owned by one agent.
pub struct ExtensionState {
    pub helpers: Helpers,
    pub pipeline: Arc<Pipeline<Chunk>>,
    installed: Mutex<Vec<Arc<dyn Extension>>>,
    node: OnceLock<Arc<PipelinedNode>>,
}

impl ExtensionState {
    pub(crate) fn new() -> Self {
        Self {
            helpers: Helpers::default(),
            pipeline: Arc::new(Pipeline::new()),
            installed: Mutex::new(Vec::new()),
            node: OnceLock::new(),
        }
    }

    /// Installed extensions in installation order.
    pub fn installed(&self) -> Vec<Arc<dyn Extension>> {
        self.installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn installed_names(&self) -> Vec<String> {
        self.installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|ext| ext.name().to_string())
            .collect()
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|ext| ext.name() == name)
    }

    pub(crate) fn push_installed(&self, extension: Arc<dyn Extension>) {
        self.installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(extension);
    }

    /// The pipelined generation adapter, once the installer has built it.
    pub fn pipelined_node(&self) -> Option<Arc<PipelinedNode>> {
        self.node.get().cloned()
    }

    pub(crate) fn pipelined_node_or_init<I>(&self, init: I) -> Arc<PipelinedNode>
    where
        I: FnOnce() -> PipelinedNode,
    {
        Arc::clone(self.node.get_or_init(|| Arc::new(init())))
    }
}

impl std::fmt::Debug for ExtensionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionState")
            .field("helpers", &self.helpers.names())
            .field("pipeline", &self.pipeline.stage_names())
            .field("installed", &self.installed_names())
            .field("patched", &self.node.get().is_some())
            .finish()
    }
}

/// Return the extension state of `agent`, creating it on first call.
pub fn get_state<A>(agent: &A) -> Arc<ExtensionState>
where
    A: ExtensibleAgent + ?Sized,
{
    agent.extension_slot().get_or_init()
}
