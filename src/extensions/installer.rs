//! Extension installation and the pipelined generation adapter.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::agent::ExtensibleAgent;
use crate::chunk::{Chunk, ChunkStream};
use crate::error::{ExtensionError, GenerationError};
use crate::extensions::registry::ExtensionRegistry;
use crate::extensions::state::{ExtensionState, get_state};
use crate::extensions::{Extension, ExtensionSpec};
use crate::generation::{ChatContext, LlmNode, ModelSettings, NodeOutput, ToolDefinition};
use crate::pipeline::Pipeline;
use crate::pipeline::isolate::panic_message;

/// Outcome of [`install_extensions`].
#[derive(Debug)]
pub struct InstallReport {
    /// Extensions installed by this call, in order.
    pub installed: Vec<Arc<dyn Extension>>,
    /// Generation adapter to invoke instead of the agent's own node.
    pub node: Option<Arc<PipelinedNode>>,
}

impl InstallReport {
    pub fn installed_names(&self) -> Vec<&str> {
        self.installed.iter().map(|ext| ext.name()).collect()
    }
}

/// Resolve and install each spec onto `agent`.
///
/// Specs that fail to resolve or install are logged and skipped; the rest
/// of the batch proceeds. When anything installed and the agent has a
/// generation node, the agent's [`PipelinedNode`] is built (once per agent)
/// and returned.
pub fn install_extensions(
    registry: &ExtensionRegistry,
    agent: &dyn ExtensibleAgent,
    specs: impl IntoIterator<Item = ExtensionSpec>,
) -> InstallReport {
    let state = get_state(agent);
    let mut installed = Vec::new();

    for spec in specs {
        let description = spec.describe();
        let extension = match resolve(registry, spec) {
            Ok(extension) => extension,
            Err(e) => {
                error!(spec = %description, error = %e, "Failed to resolve extension");
                continue;
            }
        };

        let name = extension.name().to_string();
        if state.is_installed(&name) {
            warn!(
                agent = %agent.agent_name(),
                extension = %name,
                "Extension already installed on this agent, skipping"
            );
            continue;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| extension.install(agent))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(extension = %name, error = %e, "Extension install failed");
                continue;
            }
            Err(payload) => {
                let err = ExtensionError::Panicked {
                    name: name.clone(),
                    phase: "install",
                };
                error!(
                    extension = %name,
                    error = %err,
                    panic = %panic_message(payload.as_ref()),
                    "Extension install failed"
                );
                continue;
            }
        }

        debug!(agent = %agent.agent_name(), extension = %name, "Installed extension");
        state.push_installed(Arc::clone(&extension));
        installed.push(extension);
    }

    let node = if installed.is_empty() {
        state.pipelined_node()
    } else {
        ensure_pipelined_node(agent, &state)
    };

    info!(
        agent = %agent.agent_name(),
        installed = installed.len(),
        stages = state.pipeline.len(),
        "Extensions installed"
    );

    InstallReport { installed, node }
}

fn resolve(
    registry: &ExtensionRegistry,
    spec: ExtensionSpec,
) -> Result<Arc<dyn Extension>, ExtensionError> {
    match spec {
        ExtensionSpec::Instance(extension) => Ok(extension),
        ExtensionSpec::Class {
            type_name,
            construct,
        } => panic::catch_unwind(construct).map_err(|_| ExtensionError::Panicked {
            name: type_name.to_string(),
            phase: "construction",
        }),
        ExtensionSpec::Factory(factory) => panic::catch_unwind(AssertUnwindSafe(factory))
            .map_err(|payload| ExtensionError::ResolutionFailed {
                reason: format!("factory panicked: {}", panic_message(payload.as_ref())),
            })?,
        ExtensionSpec::Named { name, config } => {
            match panic::catch_unwind(AssertUnwindSafe(|| registry.create(&name, &config))) {
                Ok(created) => Ok(created?),
                Err(payload) => {
                    warn!(
                        extension = %name,
                        panic = %panic_message(payload.as_ref()),
                        "Extension constructor panicked"
                    );
                    Err(ExtensionError::Panicked {
                        name,
                        phase: "construction",
                    })
                }
            }
        }
    }
}

fn ensure_pipelined_node(
    agent: &dyn ExtensibleAgent,
    state: &ExtensionState,
) -> Option<Arc<PipelinedNode>> {
    if let Some(node) = state.pipelined_node() {
        return Some(node);
    }

    let Some(original) = agent.llm_node() else {
        warn!(
            agent = %agent.agent_name(),
            "Agent does not expose an llm node; running without the extension pipeline"
        );
        return None;
    };

    Some(state.pipelined_node_or_init(|| PipelinedNode::new(original, Arc::clone(&state.pipeline))))
}

/// Generation node that routes the wrapped node's output through the
/// agent's extension pipeline.
pub struct PipelinedNode {
    original: Arc<dyn LlmNode>,
    pipeline: Arc<Pipeline<Chunk>>,
}

impl PipelinedNode {
    pub fn new(original: Arc<dyn LlmNode>, pipeline: Arc<Pipeline<Chunk>>) -> Self {
        Self { original, pipeline }
    }

    /// The unwrapped node.
    pub fn original(&self) -> &Arc<dyn LlmNode> {
        &self.original
    }

    /// Run the wrapped node and return its fragments as a stream.
    pub async fn generate(
        &self,
        chat_ctx: &ChatContext,
        tools: &[ToolDefinition],
        settings: Option<&ModelSettings>,
    ) -> Result<ChunkStream, GenerationError> {
        let output = self.original.llm_node(chat_ctx, tools, settings).await?;
        let stream = output.into_stream();
        if self.pipeline.is_empty() {
            return Ok(stream);
        }
        Ok(self.pipeline.process(stream))
    }
}

#[async_trait]
impl LlmNode for PipelinedNode {
    async fn llm_node(
        &self,
        chat_ctx: &ChatContext,
        tools: &[ToolDefinition],
        settings: Option<&ModelSettings>,
    ) -> Result<NodeOutput, GenerationError> {
        self.generate(chat_ctx, tools, settings)
            .await
            .map(NodeOutput::Stream)
    }
}

impl std::fmt::Debug for PipelinedNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelinedNode")
            .field("stages", &self.pipeline.stage_names())
            .finish()
    }
}
