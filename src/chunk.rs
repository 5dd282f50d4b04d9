//! Generation fragments and text accessors.
//!
//! Every other component reads and writes fragment text through
//! [`extract_text`] and [`inject_text`], so only this module knows the
//! shape of the engine's fragment type.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

/// A lazily produced sequence of fragments.
pub type ChunkStream<F = Chunk> = Pin<Box<dyn Stream<Item = F> + Send>>;

/// Incremental content of a streamed completion choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceDelta {
    pub role: Option<String>,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<serde_json::Value>,
}

impl ChoiceDelta {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }
}

/// One chunk of a streamed chat completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChunk {
    pub id: String,
    pub delta: Option<ChoiceDelta>,
}

impl ChatChunk {
    pub fn new(id: impl Into<String>, delta: ChoiceDelta) -> Self {
        Self {
            id: id.into(),
            delta: Some(delta),
        }
    }
}

/// A single fragment emitted by a generation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Chunk {
    /// Raw text delta.
    Text(String),
    /// Structured chat completion chunk.
    Chat(ChatChunk),
    /// Anything else the engine emits (audio frames, usage reports, ...).
    Other(serde_json::Value),
}

impl Chunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Chat chunk carrying only text content.
    pub fn delta(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Chat(ChatChunk::new(id, ChoiceDelta::content(content)))
    }
}

impl From<String> for Chunk {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Chunk {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<ChatChunk> for Chunk {
    fn from(chunk: ChatChunk) -> Self {
        Self::Chat(chunk)
    }
}

/// Best-effort extraction of the text content of a fragment.
pub fn extract_text(chunk: &Chunk) -> Option<&str> {
    match chunk {
        Chunk::Text(text) => Some(text),
        Chunk::Chat(chat) => chat.delta.as_ref().and_then(|d| d.content.as_deref()),
        Chunk::Other(_) => None,
    }
}

/// Replace the text content of `chunk` while keeping its shape.
///
/// A chat chunk keeps its id and the rest of its delta. Fragments with no
/// text slot become plain text.
pub fn inject_text(chunk: Chunk, new: impl Into<String>) -> Chunk {
    match chunk {
        Chunk::Chat(ChatChunk {
            id,
            delta: Some(mut delta),
        }) => {
            delta.content = Some(new.into());
            Chunk::Chat(ChatChunk {
                id,
                delta: Some(delta),
            })
        }
        _ => Chunk::Text(new.into()),
    }
}
