//! Deliver one call to whichever peer accepts it first.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::RpcError;
use crate::rpc::helper::RpcHelper;
use crate::rpc::payload::IntoPayload;

/// Options for [`RpcHelper::broadcast`].
#[derive(Debug, Clone)]
pub struct BroadcastOptions {
    /// Skip peers that are themselves agents.
    pub skip_agents: bool,
    /// How long to wait for peers to appear. `None` tries once.
    pub wait_for_peers: Option<Duration>,
    /// Poll interval while waiting for peers.
    pub poll_interval: Duration,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self {
            skip_agents: true,
            wait_for_peers: None,
            poll_interval: Duration::from_millis(200),
        }
    }
}

impl BroadcastOptions {
    pub fn wait_for_peers(mut self, deadline: Duration) -> Self {
        self.wait_for_peers = Some(deadline);
        self
    }

    pub fn include_agents(mut self) -> Self {
        self.skip_agents = false;
        self
    }
}

/// Result of a broadcast that did not hit a hard error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// `identity` accepted the call and responded.
    Delivered { identity: String, response: String },
    /// Every candidate peer reported the method as unsupported.
    Unsupported { attempted: Vec<String> },
    /// No candidate peer appeared before the deadline.
    NoPeers,
}

impl BroadcastOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

impl RpcHelper {
    /// Try candidate peers one at a time until one accepts `method`.
    ///
    /// Peers answering "unsupported method" are skipped; any other failure
    /// stops the broadcast and is returned.
    pub async fn broadcast(
        &self,
        method: &str,
        payload: impl IntoPayload,
        options: BroadcastOptions,
    ) -> Result<BroadcastOutcome, RpcError> {
        let payload = payload.into_payload()?;
        if !self.is_bound() {
            return Err(RpcError::NotBound);
        }

        let deadline = options.wait_for_peers.map(|wait| Instant::now() + wait);
        let candidates = loop {
            let candidates: Vec<String> = self
                .peers()
                .into_iter()
                .filter(|peer| !(options.skip_agents && peer.is_agent()))
                .map(|peer| peer.identity)
                .collect();
            if !candidates.is_empty() {
                break candidates;
            }
            match deadline {
                Some(deadline) if Instant::now() < deadline => {
                    tokio::time::sleep(options.poll_interval).await;
                }
                _ => {
                    debug!(method = %method, "No peers available for broadcast");
                    return Ok(BroadcastOutcome::NoPeers);
                }
            }
        };

        let mut attempted = Vec::with_capacity(candidates.len());
        for identity in candidates {
            match self.send(method, payload.clone(), Some(&identity)).await {
                Ok(response) => {
                    debug!(method = %method, identity = %identity, "Broadcast delivered");
                    return Ok(BroadcastOutcome::Delivered { identity, response });
                }
                Err(RpcError::Remote { source, .. }) if source.is_unsupported_method() => {
                    debug!(method = %method, identity = %identity, "Peer does not support method");
                    attempted.push(identity);
                }
                Err(e) => return Err(e),
            }
        }

        debug!(method = %method, attempted = attempted.len(), "No peer accepted broadcast");
        Ok(BroadcastOutcome::Unsupported { attempted })
    }
}
