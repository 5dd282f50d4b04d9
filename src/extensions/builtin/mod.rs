//! Extensions shipped with the runtime.

mod content_filter;
mod extract_urls;
mod think_filter;

pub use content_filter::{ContentFilter, TERMS_HELPER};
pub use extract_urls::{ExtractUrls, UrlExtractor};
pub use think_filter::{DEFAULT_READY_PHRASE, ThinkFilter};

use std::sync::Arc;

use tracing::warn;

use crate::extensions::Extension;
use crate::extensions::registry::ExtensionRegistry;
use crate::rpc::RpcExtension;

/// Register every built-in extension under its canonical name.
///
/// A name that is already taken is logged and left alone.
pub fn register_all(registry: &ExtensionRegistry) {
    let results = [
        registry.register(ContentFilter::NAME, |config: &serde_json::Value| {
            ContentFilter::from_value(config).map(|ext| Arc::new(ext) as Arc<dyn Extension>)
        }),
        registry.register(ExtractUrls::NAME, |_: &serde_json::Value| {
            Ok(Arc::new(ExtractUrls) as Arc<dyn Extension>)
        }),
        registry.register(RpcExtension::NAME, |config: &serde_json::Value| {
            RpcExtension::from_value(config).map(|ext| Arc::new(ext) as Arc<dyn Extension>)
        }),
        registry.register(ThinkFilter::NAME, |config: &serde_json::Value| {
            ThinkFilter::from_value(config).map(|ext| Arc::new(ext) as Arc<dyn Extension>)
        }),
    ];

    for result in results {
        if let Err(e) = result {
            warn!(error = %e, "Skipped built-in extension");
        }
    }
}
