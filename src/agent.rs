//! Agents that extensions attach to.

use std::sync::{Arc, OnceLock};

use crate::extensions::ExtensionState;
use crate::generation::LlmNode;

/// Storage for an agent's extension state, created on first access.
#[derive(Default)]
pub struct ExtensionSlot {
    state: OnceLock<Arc<ExtensionState>>,
}

impl ExtensionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The state, if any extension code has touched this agent yet.
    pub fn get(&self) -> Option<Arc<ExtensionState>> {
        self.state.get().cloned()
    }

    pub(crate) fn get_or_init(&self) -> Arc<ExtensionState> {
        Arc::clone(self.state.get_or_init(|| Arc::new(ExtensionState::new())))
    }
}

impl std::fmt::Debug for ExtensionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionSlot")
            .field("initialized", &self.state.get().is_some())
            .finish()
    }
}

/// An agent that can carry extensions.
///
/// Hosts embed an [`ExtensionSlot`] in their agent type and expose it here.
pub trait ExtensibleAgent: Send + Sync {
    fn extension_slot(&self) -> &ExtensionSlot;

    /// The agent's generation operation, if it has one.
    fn llm_node(&self) -> Option<Arc<dyn LlmNode>> {
        None
    }

    /// Name used in log output.
    fn agent_name(&self) -> &str {
        "agent"
    }
}

/// A plain agent: a name, instructions, and an optional generation node.
pub struct Agent {
    name: String,
    instructions: String,
    node: Option<Arc<dyn LlmNode>>,
    slot: ExtensionSlot,
}

impl Agent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: String::new(),
            node: None,
            slot: ExtensionSlot::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_llm_node(mut self, node: Arc<dyn LlmNode>) -> Self {
        self.node = Some(node);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }
}

impl ExtensibleAgent for Agent {
    fn extension_slot(&self) -> &ExtensionSlot {
        &self.slot
    }

    fn llm_node(&self) -> Option<Arc<dyn LlmNode>> {
        self.node.clone()
    }

    fn agent_name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("has_llm_node", &self.node.is_some())
            .field("slot", &self.slot)
            .finish()
    }
}
