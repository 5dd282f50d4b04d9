//! Boundary traits for the host's communication session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::RemoteError;
use crate::rpc::payload::Payload;

/// What kind of participant a peer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    Standard,
    /// Another agent. Broadcasts skip these by default.
    Agent,
}

/// A remote participant of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub identity: String,
    pub kind: PeerKind,
}

impl Peer {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            kind: PeerKind::Standard,
        }
    }

    pub fn agent(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            kind: PeerKind::Agent,
        }
    }

    pub fn is_agent(&self) -> bool {
        self.kind == PeerKind::Agent
    }
}

/// An incoming call delivered to a registered method handler.
#[derive(Debug, Clone)]
pub struct RpcInvocation {
    pub request_id: String,
    pub caller_identity: String,
    pub payload: Payload,
    pub response_timeout: Duration,
}

impl RpcInvocation {
    pub fn new(caller_identity: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            caller_identity: caller_identity.into(),
            payload: payload.into(),
            response_timeout: Duration::from_secs(10),
        }
    }
}

/// Handler for an incoming call. Resolves to the response text.
pub type RpcHandler =
    Arc<dyn Fn(RpcInvocation) -> BoxFuture<'static, Result<String, RemoteError>> + Send + Sync>;

/// The session's addressed-call primitive for this process.
#[async_trait]
pub trait LocalEndpoint: Send + Sync {
    /// Call `method` on `destination` and wait for its response.
    async fn perform_rpc(
        &self,
        destination: &str,
        method: &str,
        payload: Payload,
    ) -> Result<String, RemoteError>;

    /// Accept incoming calls to `method`.
    fn register_rpc_method(&self, method: &str, handler: RpcHandler);
}

/// A live communication session.
pub trait Session: Send + Sync {
    fn remote_peers(&self) -> Vec<Peer>;

    /// The local endpoint, once the session is connected.
    fn local_endpoint(&self) -> Option<Arc<dyn LocalEndpoint>>;
}

/// The job the agent runs in. May carry the session before the agent sees it.
pub trait JobContext: Send + Sync {
    fn session(&self) -> Option<Arc<dyn Session>>;
}
