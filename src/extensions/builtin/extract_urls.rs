//! URL extraction helper.

use std::sync::Arc;

use regex::Regex;

use crate::agent::ExtensibleAgent;
use crate::error::ExtensionError;
use crate::extensions::{Extension, get_state};

/// Finds `http`/`https` URLs in free text.
#[derive(Debug, Clone)]
pub struct UrlExtractor {
    pattern: Regex,
}

impl UrlExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(r"https?://\S+")?,
        })
    }

    pub fn extract(&self, text: &str) -> Vec<String> {
        self.pattern
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

/// Exposes a [`UrlExtractor`] under the `extract_urls` helper slot.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractUrls;

impl ExtractUrls {
    pub const NAME: &'static str = "extract_urls";
}

impl Extension for ExtractUrls {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn install(&self, agent: &dyn ExtensibleAgent) -> Result<(), ExtensionError> {
        let extractor = UrlExtractor::new().map_err(|e| ExtensionError::InstallFailed {
            name: Self::NAME.to_string(),
            reason: e.to_string(),
        })?;
        get_state(agent)
            .helpers
            .insert(Self::NAME, Arc::new(extractor));
        Ok(())
    }
}
