//! The `rpc` extension and agent-level RPC helpers.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::agent::ExtensibleAgent;
use crate::config::DEFAULT_RPC_RETRY_INTERVAL;
use crate::error::ExtensionError;
use crate::extensions::{Extension, get_state, parse_config};
use crate::rpc::RPC_HELPER;
use crate::rpc::helper::{BindArgs, RpcHelper};
use crate::rpc::session::Session;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RpcExtensionConfig {
    retry_interval_ms: u64,
}

impl Default for RpcExtensionConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: DEFAULT_RPC_RETRY_INTERVAL.as_millis() as u64,
        }
    }
}

/// Installs an [`RpcHelper`] into the agent's `rpc` helper slot.
#[derive(Debug, Clone)]
pub struct RpcExtension {
    retry_interval: Duration,
}

impl RpcExtension {
    pub const NAME: &'static str = "rpc";

    pub fn new(retry_interval: Duration) -> Self {
        Self { retry_interval }
    }

    pub fn from_value(config: &serde_json::Value) -> Result<Self, ExtensionError> {
        let config: RpcExtensionConfig = parse_config(Self::NAME, config)?;
        if config.retry_interval_ms == 0 {
            return Err(ExtensionError::InvalidConfig {
                name: Self::NAME.to_string(),
                reason: "retry_interval_ms must be greater than zero".to_string(),
            });
        }
        Ok(Self::new(Duration::from_millis(config.retry_interval_ms)))
    }
}

impl Default for RpcExtension {
    fn default() -> Self {
        Self::new(DEFAULT_RPC_RETRY_INTERVAL)
    }
}

impl Extension for RpcExtension {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn install(&self, agent: &dyn ExtensibleAgent) -> Result<(), ExtensionError> {
        let interval = self.retry_interval;
        get_state(agent)
            .helpers
            .get_or_insert_with(RPC_HELPER, || Arc::new(RpcHelper::new(interval)))
            .map(|_| ())
            .ok_or_else(|| ExtensionError::InstallFailed {
                name: Self::NAME.to_string(),
                reason: "helper slot 'rpc' holds a different type".to_string(),
            })
    }
}

/// The agent's RPC helper, if the `rpc` extension is installed.
pub fn rpc_helper<A>(agent: &A) -> Option<Arc<RpcHelper>>
where
    A: ExtensibleAgent + ?Sized,
{
    get_state(agent).helpers.get::<RpcHelper>(RPC_HELPER)
}

/// Bind `agent`'s RPC helper to `session`. Hosts call this when a session
/// starts. Returns whether a helper was bound.
pub fn bind_on_session_start<A>(agent: &A, session: Arc<dyn Session>) -> bool
where
    A: ExtensibleAgent + ?Sized,
{
    let Some(helper) = rpc_helper(agent) else {
        debug!(agent = %agent.agent_name(), "No RPC helper to bind on session start");
        return false;
    };
    helper.bind(BindArgs::session(session));
    true
}
