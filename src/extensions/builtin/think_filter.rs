//! Strips `<think>` reasoning markers from streamed text.

use serde::Deserialize;

use crate::agent::ExtensibleAgent;
use crate::chunk::{Chunk, extract_text, inject_text};
use crate::error::ExtensionError;
use crate::extensions::{Extension, get_state, parse_config};
use crate::pipeline::map_stage;

pub const DEFAULT_READY_PHRASE: &str = "Okay, I'm ready to respond.";

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ThinkFilterConfig {
    ready_phrase: String,
}

impl Default for ThinkFilterConfig {
    fn default() -> Self {
        Self {
            ready_phrase: DEFAULT_READY_PHRASE.to_string(),
        }
    }
}

/// Strips reasoning markers emitted by models that think out loud.
///
/// `<think>` is removed and `</think>` is replaced by a short spoken phrase
/// so the listener hears something when reasoning ends.
#[derive(Debug, Clone)]
pub struct ThinkFilter {
    ready_phrase: String,
}

impl ThinkFilter {
    pub const NAME: &'static str = "think_filter";

    pub fn new(ready_phrase: impl Into<String>) -> Self {
        Self {
            ready_phrase: ready_phrase.into(),
        }
    }

    pub fn from_value(config: &serde_json::Value) -> Result<Self, ExtensionError> {
        let config: ThinkFilterConfig = parse_config(Self::NAME, config)?;
        Ok(Self::new(config.ready_phrase))
    }

    fn sanitize(&self, chunk: Chunk) -> Chunk {
        let Some(text) = extract_text(&chunk) else {
            return chunk;
        };
        if !text.contains(THINK_OPEN) && !text.contains(THINK_CLOSE) {
            return chunk;
        }
        let sanitized = text
            .replace(THINK_OPEN, "")
            .replace(THINK_CLOSE, &self.ready_phrase);
        inject_text(chunk, sanitized)
    }
}

impl Default for ThinkFilter {
    fn default() -> Self {
        Self::new(DEFAULT_READY_PHRASE)
    }
}

impl Extension for ThinkFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn install(&self, agent: &dyn ExtensibleAgent) -> Result<(), ExtensionError> {
        let filter = self.clone();
        get_state(agent)
            .pipeline
            .add(map_stage(Self::NAME, move |chunk: Chunk| Ok(filter.sanitize(chunk))));
        Ok(())
    }
}
