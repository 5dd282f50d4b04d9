//! Generation engine boundary.
//!
//! The host's engine implements [`LlmNode`]. The runtime never looks inside
//! fragments except through `chunk::extract_text` / `chunk::inject_text`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, ChunkStream};
use crate::error::GenerationError;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the conversation handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Conversation state for one generation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatContext {
    pub messages: Vec<ChatMessage>,
}

impl ChatContext {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }
}

/// Definition of a tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Optional per-call model settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tool_choice: Option<String>,
}

/// What a generation node produces: one realized fragment or a lazy stream.
pub enum NodeOutput {
    Chunk(Chunk),
    Stream(ChunkStream),
}

impl NodeOutput {
    /// Normalize into a lazy stream. A single fragment becomes a one-element
    /// stream; a stream passes through.
    pub fn into_stream(self) -> ChunkStream {
        match self {
            Self::Chunk(chunk) => Box::pin(futures::stream::once(async move { chunk })),
            Self::Stream(stream) => stream,
        }
    }
}

impl std::fmt::Debug for NodeOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chunk(chunk) => f.debug_tuple("Chunk").field(chunk).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// The agent's generation operation.
#[async_trait]
pub trait LlmNode: Send + Sync {
    async fn llm_node(
        &self,
        chat_ctx: &ChatContext,
        tools: &[ToolDefinition],
        settings: Option<&ModelSettings>,
    ) -> Result<NodeOutput, GenerationError>;
}
