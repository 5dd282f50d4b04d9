//! Agent Extensions: a runtime that lets independently written extensions
//! attach to a streaming conversational agent.
//!
//! Extensions transform generated text through a per-agent [`Pipeline`] and
//! talk to session peers through an [`rpc::RpcHelper`] that can be used
//! before the session exists.

pub mod agent;
pub mod chunk;
pub mod config;
pub mod error;
pub mod extensions;
pub mod generation;
pub mod pipeline;
pub mod rpc;

pub use agent::{Agent, ExtensibleAgent, ExtensionSlot};
pub use chunk::{Chunk, ChunkStream, extract_text, inject_text};
pub use config::ExtensionsConfig;
pub use error::{Error, Result};
pub use extensions::{
    Extension, ExtensionRegistry, ExtensionSpec, ExtensionState, InstallReport, PipelinedNode,
    get_state, install_extensions,
};
pub use pipeline::Pipeline;
