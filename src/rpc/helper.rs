//! Per-agent RPC helper.
//!
//! Binds lazily to the host's session. Method registrations made before a
//! local endpoint exists are queued and flushed on the next resolvable
//! `bind`, or by a single retry task that re-attempts on a fixed interval.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::DEFAULT_RPC_RETRY_INTERVAL;
use crate::error::{RemoteError, RpcError};
use crate::rpc::payload::IntoPayload;
use crate::rpc::session::{JobContext, LocalEndpoint, Peer, RpcHandler, RpcInvocation, Session};

/// Partial update applied by [`RpcHelper::bind`]. Unset fields keep their
/// current binding.
#[derive(Default, Clone)]
pub struct BindArgs {
    pub session: Option<Arc<dyn Session>>,
    pub context: Option<Arc<dyn JobContext>>,
    pub default_identity: Option<String>,
}

impl BindArgs {
    pub fn session(session: Arc<dyn Session>) -> Self {
        Self {
            session: Some(session),
            ..Self::default()
        }
    }

    pub fn context(context: Arc<dyn JobContext>) -> Self {
        Self {
            context: Some(context),
            ..Self::default()
        }
    }

    pub fn with_default_identity(mut self, identity: impl Into<String>) -> Self {
        self.default_identity = Some(identity.into());
        self
    }
}

impl std::fmt::Debug for BindArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindArgs")
            .field("session", &self.session.is_some())
            .field("context", &self.context.is_some())
            .field("default_identity", &self.default_identity)
            .finish()
    }
}

#[derive(Default)]
struct Binding {
    session: Option<Arc<dyn Session>>,
    context: Option<Arc<dyn JobContext>>,
    default_identity: Option<String>,
    pending: VecDeque<(String, RpcHandler)>,
    retry: Option<JoinHandle<()>>,
}

impl Binding {
    /// The bound session, falling back to the job context's session.
    fn session(&self) -> Option<Arc<dyn Session>> {
        self.session
            .clone()
            .or_else(|| self.context.as_ref().and_then(|ctx| ctx.session()))
    }

    fn endpoint(&self) -> Option<Arc<dyn LocalEndpoint>> {
        self.session().and_then(|session| session.local_endpoint())
    }

    fn peers(&self) -> Vec<Peer> {
        self.session()
            .map(|session| session.remote_peers())
            .unwrap_or_default()
    }

    fn default_identity(&self) -> Option<String> {
        if let Some(identity) = self.default_identity.as_ref().filter(|id| !id.is_empty()) {
            return Some(identity.clone());
        }
        self.peers().into_iter().next().map(|peer| peer.identity)
    }

    fn retry_running(&self) -> bool {
        self.retry.as_ref().is_some_and(|task| !task.is_finished())
    }
}

struct Inner {
    binding: Mutex<Binding>,
    retry_interval: Duration,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Binding> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let binding = self.binding.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = binding.retry.take() {
            task.abort();
        }
    }
}

/// RPC utilities for one agent, stored in its `rpc` helper slot.
#[derive(Clone)]
pub struct RpcHelper {
    inner: Arc<Inner>,
}

impl RpcHelper {
    pub fn new(retry_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                binding: Mutex::new(Binding::default()),
                retry_interval,
            }),
        }
    }

    pub fn retry_interval(&self) -> Duration {
        self.inner.retry_interval
    }

    /// Update the binding and try to flush queued registrations.
    pub fn bind(&self, args: BindArgs) {
        {
            let mut binding = self.inner.lock();
            if let Some(session) = args.session {
                binding.session = Some(session);
            }
            if let Some(context) = args.context {
                binding.context = Some(context);
            }
            if let Some(identity) = args.default_identity {
                binding.default_identity = Some(identity);
            }
        }
        flush_pending(&self.inner);
    }

    pub fn is_bound(&self) -> bool {
        self.inner.lock().endpoint().is_some()
    }

    pub fn session(&self) -> Option<Arc<dyn Session>> {
        self.inner.lock().session()
    }

    /// Remote peers of the bound session, empty when unbound.
    pub fn peers(&self) -> Vec<Peer> {
        self.inner.lock().peers()
    }

    /// The explicit default identity, else the identity of some known peer.
    pub fn default_identity(&self) -> Option<String> {
        self.inner.lock().default_identity()
    }

    pub fn set_default_identity(&self, identity: Option<String>) {
        self.inner.lock().default_identity = identity;
    }

    /// Register `handler` for incoming calls to `method`.
    ///
    /// Registered immediately when a local endpoint resolves, otherwise
    /// queued until one does.
    pub fn register<H, Fut>(&self, method: &str, handler: H) -> RpcHandler
    where
        H: Fn(RpcInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, RemoteError>> + Send + 'static,
    {
        let handler: RpcHandler = Arc::new(move |invocation| handler(invocation).boxed());
        self.register_handler(method, handler)
    }

    pub fn register_handler(&self, method: &str, handler: RpcHandler) -> RpcHandler {
        self.inner
            .lock()
            .pending
            .push_back((method.to_string(), Arc::clone(&handler)));
        flush_pending(&self.inner);
        handler
    }

    /// Methods still waiting for a local endpoint, in registration order.
    pub fn pending_methods(&self) -> Vec<String> {
        self.inner
            .lock()
            .pending
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }

    pub fn retry_scheduled(&self) -> bool {
        self.inner.lock().retry_running()
    }

    /// Call `method` on `identity`, or on the default destination when
    /// `identity` is `None`. Resolves to the remote response.
    pub async fn send(
        &self,
        method: &str,
        payload: impl IntoPayload,
        identity: Option<&str>,
    ) -> Result<String, RpcError> {
        let payload = payload.into_payload()?;
        let (endpoint, destination) = {
            let binding = self.inner.lock();
            let endpoint = binding.endpoint().ok_or(RpcError::NotBound)?;
            let destination = identity
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .or_else(|| binding.default_identity())
                .ok_or(RpcError::NoDestination)?;
            (endpoint, destination)
        };

        debug!(method = %method, destination = %destination, "Sending RPC");
        endpoint
            .perform_rpc(&destination, method, payload)
            .await
            .map_err(|source| RpcError::Remote {
                destination,
                source,
            })
    }

    /// Decode the JSON payload of an incoming call. Empty payloads give `None`.
    pub fn load_payload(
        &self,
        invocation: &RpcInvocation,
    ) -> Result<Option<serde_json::Value>, RpcError> {
        let Some(text) = self.payload_text(invocation).filter(|text| !text.is_empty()) else {
            return Ok(None);
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| RpcError::InvalidPayload {
                payload: text,
                reason: e.to_string(),
            })
    }

    /// Decode the JSON payload of an incoming call into `T`.
    pub fn load_payload_as<T>(&self, invocation: &RpcInvocation) -> Result<Option<T>, RpcError>
    where
        T: DeserializeOwned,
    {
        let Some(value) = self.load_payload(invocation)? else {
            return Ok(None);
        };
        let raw = value.to_string();
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| RpcError::InvalidPayload {
                payload: raw,
                reason: e.to_string(),
            })
    }

    /// The raw payload of an incoming call as text.
    pub fn payload_text(&self, invocation: &RpcInvocation) -> Option<String> {
        invocation.payload.as_text().map(|text| text.into_owned())
    }

    /// Cancel the retry task, if any. Queued registrations stay queued.
    pub fn shutdown(&self) {
        if let Some(task) = self.inner.lock().retry.take() {
            task.abort();
            debug!("Cancelled RPC registration retry");
        }
    }
}

impl Default for RpcHelper {
    fn default() -> Self {
        Self::new(DEFAULT_RPC_RETRY_INTERVAL)
    }
}

impl std::fmt::Debug for RpcHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let binding = self.inner.lock();
        f.debug_struct("RpcHelper")
            .field("session", &binding.session.is_some())
            .field("context", &binding.context.is_some())
            .field("default_identity", &binding.default_identity)
            .field("pending", &binding.pending.len())
            .field("retry_interval", &self.inner.retry_interval)
            .finish()
    }
}

/// Drain the pending queue into the local endpoint, or schedule a retry
/// when none resolves yet.
fn flush_pending(inner: &Arc<Inner>) {
    let (endpoint, pending) = {
        let mut binding = inner.lock();
        if binding.pending.is_empty() {
            return;
        }
        let Some(endpoint) = binding.endpoint() else {
            drop(binding);
            schedule_retry(inner);
            return;
        };
        if let Some(task) = binding.retry.take() {
            task.abort();
        }
        (endpoint, binding.pending.drain(..).collect::<Vec<_>>())
    };
    register_all(endpoint.as_ref(), pending);
}

fn register_all(endpoint: &dyn LocalEndpoint, pending: Vec<(String, RpcHandler)>) {
    for (method, handler) in pending {
        debug!(method = %method, "Registered RPC method");
        endpoint.register_rpc_method(&method, handler);
    }
}

fn schedule_retry(inner: &Arc<Inner>) {
    let Ok(runtime) = Handle::try_current() else {
        debug!("No async runtime; queued RPC registrations wait for the next bind");
        return;
    };

    let mut binding = inner.lock();
    if binding.pending.is_empty() || binding.retry_running() {
        return;
    }

    let weak = Arc::downgrade(inner);
    let interval = inner.retry_interval;
    binding.retry = Some(runtime.spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if !retry_flush(&weak) {
                break;
            }
        }
    }));
    debug!(
        pending = binding.pending.len(),
        interval_ms = interval.as_millis() as u64,
        "Scheduled RPC registration retry"
    );
}

/// One retry attempt. Returns whether the task should keep running.
fn retry_flush(weak: &Weak<Inner>) -> bool {
    let Some(inner) = weak.upgrade() else {
        return false;
    };

    let (endpoint, pending) = {
        let mut binding = inner.lock();
        if binding.pending.is_empty() {
            binding.retry = None;
            return false;
        }
        let Some(endpoint) = binding.endpoint() else {
            return true;
        };
        binding.retry = None;
        (endpoint, binding.pending.drain(..).collect::<Vec<_>>())
    };

    register_all(endpoint.as_ref(), pending);
    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde::Deserialize;

    use super::*;
    use crate::rpc::payload::Payload;

    #[derive(Default)]
    struct FakeEndpoint {
        registered: Mutex<Vec<String>>,
        sent: Mutex<Vec<(String, String, Payload)>>,
    }

    #[async_trait]
    impl LocalEndpoint for FakeEndpoint {
        async fn perform_rpc(
            &self,
            destination: &str,
            method: &str,
            payload: Payload,
        ) -> Result<String, RemoteError> {
            self.sent
                .lock()
                .unwrap()
                .push((destination.to_string(), method.to_string(), payload));
            if destination == "broken" {
                return Err(RemoteError::new(RemoteError::RECIPIENT_DISCONNECTED, "gone"));
            }
            Ok("ok".to_string())
        }

        fn register_rpc_method(&self, method: &str, _handler: RpcHandler) {
            self.registered.lock().unwrap().push(method.to_string());
        }
    }

    struct FakeSession {
        endpoint: Arc<FakeEndpoint>,
        ready: AtomicBool,
        lookups: AtomicUsize,
        peers: Vec<Peer>,
    }

    impl FakeSession {
        fn new(ready: bool, peers: Vec<Peer>) -> Arc<Self> {
            Arc::new(Self {
                endpoint: Arc::new(FakeEndpoint::default()),
                ready: AtomicBool::new(ready),
                lookups: AtomicUsize::new(0),
                peers,
            })
        }

        fn registered(&self) -> Vec<String> {
            self.endpoint.registered.lock().unwrap().clone()
        }
    }

    impl Session for FakeSession {
        fn remote_peers(&self) -> Vec<Peer> {
            self.peers.clone()
        }

        fn local_endpoint(&self) -> Option<Arc<dyn LocalEndpoint>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.ready.load(Ordering::SeqCst) {
                Some(self.endpoint.clone())
            } else {
                None
            }
        }
    }

    struct FakeContext(Arc<FakeSession>);

    impl JobContext for FakeContext {
        fn session(&self) -> Option<Arc<dyn Session>> {
            Some(self.0.clone())
        }
    }

    async fn echo(invocation: RpcInvocation) -> Result<String, RemoteError> {
        Ok(invocation.caller_identity)
    }

    #[tokio::test]
    async fn test_register_when_bound_is_immediate() {
        let session = FakeSession::new(true, vec![]);
        let helper = RpcHelper::default();
        helper.bind(BindArgs::session(session.clone()));

        helper.register("ping", echo);
        assert_eq!(session.registered(), vec!["ping"]);
        assert!(helper.pending_methods().is_empty());
        assert!(!helper.retry_scheduled());
    }

    #[tokio::test]
    async fn test_deferred_registration_flushed_on_bind() {
        let helper = RpcHelper::default();
        helper.register("a", echo);
        helper.register("b", echo);
        assert_eq!(helper.pending_methods(), vec!["a", "b"]);
        assert!(helper.retry_scheduled());

        let session = FakeSession::new(true, vec![]);
        helper.bind(BindArgs::session(session.clone()));
        assert_eq!(session.registered(), vec!["a", "b"]);
        assert!(helper.pending_methods().is_empty());
        assert!(!helper.retry_scheduled());

        // Rebinding never re-registers drained methods.
        helper.bind(BindArgs::session(session.clone()));
        assert_eq!(session.registered(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_retry_task_until_endpoint_appears() {
        let session = FakeSession::new(false, vec![]);
        let helper = RpcHelper::new(Duration::from_millis(200));
        helper.bind(BindArgs::session(session.clone()));
        helper.register("a", echo);
        helper.register("b", echo);
        helper.bind(BindArgs::default());
        assert!(helper.retry_scheduled());

        let before = session.lookups.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(210)).await;
        assert_eq!(session.lookups.load(Ordering::SeqCst), before + 1);
        assert!(session.registered().is_empty());

        session.ready.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(session.registered(), vec!["a", "b"]);
        assert!(helper.pending_methods().is_empty());
        assert!(!helper.retry_scheduled());

        helper.bind(BindArgs::default());
        assert_eq!(session.registered(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_retry() {
        let helper = RpcHelper::default();
        helper.register("a", echo);
        assert!(helper.retry_scheduled());

        helper.shutdown();
        assert!(!helper.retry_scheduled());
        assert_eq!(helper.pending_methods(), vec!["a"]);
    }

    #[test]
    fn test_no_runtime_keeps_queue_without_retry() {
        let helper = RpcHelper::default();
        helper.register("a", echo);
        assert_eq!(helper.pending_methods(), vec!["a"]);
        assert!(!helper.retry_scheduled());
    }

    #[tokio::test]
    async fn test_context_session_is_used() {
        let session = FakeSession::new(true, vec![Peer::new("p1")]);
        let helper = RpcHelper::default();
        helper.register("a", echo);
        helper.bind(BindArgs::context(Arc::new(FakeContext(session.clone()))));

        assert!(helper.is_bound());
        assert_eq!(session.registered(), vec!["a"]);
        assert_eq!(helper.default_identity().as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn test_send_destination_resolution() {
        let helper = RpcHelper::default();
        assert!(matches!(
            helper.send("m", (), None).await,
            Err(RpcError::NotBound)
        ));

        let lonely = FakeSession::new(true, vec![]);
        helper.bind(BindArgs::session(lonely));
        assert!(matches!(
            helper.send("m", (), None).await,
            Err(RpcError::NoDestination)
        ));

        let session = FakeSession::new(true, vec![Peer::new("p1")]);
        helper.bind(BindArgs::session(session.clone()));
        assert_eq!(helper.send("m", (), None).await.unwrap(), "ok");
        helper.send("m", "x", Some("explicit")).await.unwrap();

        helper.set_default_identity(Some("chosen".to_string()));
        helper
            .send("m", serde_json::json!({"a": 1}), None)
            .await
            .unwrap();

        let sent = session.endpoint.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![
                ("p1".to_string(), "m".to_string(), Payload::empty()),
                ("explicit".to_string(), "m".to_string(), Payload::from("x")),
                ("chosen".to_string(), "m".to_string(), Payload::from(r#"{"a":1}"#)),
            ]
        );
    }

    #[tokio::test]
    async fn test_remote_failure_propagates() {
        let session = FakeSession::new(true, vec![]);
        let helper = RpcHelper::default();
        helper.bind(BindArgs::session(session).with_default_identity("broken"));

        let err = helper.send("m", (), None).await.unwrap_err();
        match err {
            RpcError::Remote {
                destination,
                source,
            } => {
                assert_eq!(destination, "broken");
                assert_eq!(source.code, RemoteError::RECIPIENT_DISCONNECTED);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct Greeting {
        name: String,
    }

    #[test]
    fn test_load_payload() {
        let helper = RpcHelper::default();

        let empty = RpcInvocation::new("caller", "");
        assert!(helper.load_payload(&empty).unwrap().is_none());

        let invocation = RpcInvocation::new("caller", r#"{"name":"ada"}"#);
        assert_eq!(
            helper.load_payload(&invocation).unwrap(),
            Some(serde_json::json!({"name": "ada"}))
        );
        assert_eq!(
            helper.load_payload_as::<Greeting>(&invocation).unwrap(),
            Some(Greeting {
                name: "ada".to_string()
            })
        );

        let bytes = RpcInvocation::new("caller", br#"{"name":"bo"}"#.to_vec());
        assert_eq!(
            helper.payload_text(&bytes).as_deref(),
            Some(r#"{"name":"bo"}"#)
        );

        let invalid = RpcInvocation::new("caller", "{not json");
        assert!(matches!(
            helper.load_payload(&invalid),
            Err(RpcError::InvalidPayload { ref payload, .. }) if payload == "{not json"
        ));
        assert!(matches!(
            helper.load_payload_as::<Greeting>(&RpcInvocation::new("c", "[1]")),
            Err(RpcError::InvalidPayload { .. })
        ));
    }
}
