//! Replaces fragments that contain blocked terms.

use std::sync::Arc;

use crate::agent::ExtensibleAgent;
use crate::chunk::{Chunk, extract_text, inject_text};
use crate::config::ContentFilterConfig;
use crate::error::ExtensionError;
use crate::extensions::{Extension, get_state, parse_config};
use crate::pipeline::map_stage;

/// Helper slot holding the lowercased filter terms.
pub const TERMS_HELPER: &str = "content_filter_terms";

/// Replaces any fragment containing a filtered term.
///
/// Matching is case-insensitive and per fragment; a term split across two
/// fragments is not caught.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    terms: Arc<Vec<String>>,
    replacement: Arc<str>,
}

impl ContentFilter {
    pub const NAME: &'static str = "content_filter";

    pub fn new(config: ContentFilterConfig) -> Result<Self, ExtensionError> {
        let terms: Vec<String> = config
            .terms
            .iter()
            .map(|term| term.to_lowercase())
            .filter(|term| !term.is_empty())
            .collect();
        if terms.is_empty() {
            return Err(ExtensionError::InvalidConfig {
                name: Self::NAME.to_string(),
                reason: "requires at least one term".to_string(),
            });
        }
        Ok(Self {
            terms: Arc::new(terms),
            replacement: config.replacement.into(),
        })
    }

    pub fn from_value(config: &serde_json::Value) -> Result<Self, ExtensionError> {
        Self::new(parse_config(Self::NAME, config)?)
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    fn matches(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.terms.iter().any(|term| lowered.contains(term.as_str()))
    }

    fn filter(&self, chunk: Chunk) -> Chunk {
        if extract_text(&chunk).is_some_and(|text| self.matches(text)) {
            inject_text(chunk, &*self.replacement)
        } else {
            chunk
        }
    }
}

impl Default for ContentFilter {
    fn default() -> Self {
        let config = ContentFilterConfig::default();
        Self {
            terms: Arc::new(config.terms.iter().map(|t| t.to_lowercase()).collect()),
            replacement: config.replacement.into(),
        }
    }
}

impl Extension for ContentFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn install(&self, agent: &dyn ExtensibleAgent) -> Result<(), ExtensionError> {
        let state = get_state(agent);
        state.helpers.insert(TERMS_HELPER, Arc::clone(&self.terms));

        let filter = self.clone();
        state
            .pipeline
            .add(map_stage(Self::NAME, move |chunk: Chunk| Ok(filter.filter(chunk))));
        Ok(())
    }
}
