//! End-to-end tests for the extension runtime.
//!
//! Each test builds an agent around a scripted generation node and an
//! in-memory session, installs extensions through the registry and checks
//! what the host observes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use agent_extensions::chunk::{Chunk, extract_text, inject_text};
use agent_extensions::error::{ExtensionError, GenerationError, RemoteError, RpcError};
use agent_extensions::extensions::{
    Extension, ExtensionRegistry, ExtensionSpec, get_state, install_extensions,
};
use agent_extensions::generation::{
    ChatContext, ChatMessage, LlmNode, ModelSettings, NodeOutput, ToolDefinition,
};
use agent_extensions::pipeline::map_stage;
use agent_extensions::rpc::{
    self, BindArgs, CallInput, LocalEndpoint, Payload, Peer, RpcCall, RpcHandler, RpcInvocation,
    Session,
};
use agent_extensions::{Agent, ExtensibleAgent};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Generation node that streams a fixed list of text fragments.
struct ScriptedNode(Vec<&'static str>);

#[async_trait]
impl LlmNode for ScriptedNode {
    async fn llm_node(
        &self,
        _chat_ctx: &ChatContext,
        _tools: &[ToolDefinition],
        _settings: Option<&ModelSettings>,
    ) -> Result<NodeOutput, GenerationError> {
        let chunks: Vec<Chunk> = self.0.iter().map(|t| Chunk::delta("resp-1", *t)).collect();
        Ok(NodeOutput::Stream(Box::pin(futures::stream::iter(chunks))))
    }
}

/// Extension adding one text-mapping stage.
struct TextStage {
    name: &'static str,
    map: fn(&str) -> String,
}

impl Extension for TextStage {
    fn name(&self) -> &str {
        self.name
    }

    fn install(&self, agent: &dyn ExtensibleAgent) -> Result<(), ExtensionError> {
        let map = self.map;
        get_state(agent)
            .pipeline
            .add(map_stage(self.name, move |chunk: Chunk| {
                let mapped = extract_text(&chunk).map(map);
                Ok(match mapped {
                    Some(text) => inject_text(chunk, text),
                    None => chunk,
                })
            }));
        Ok(())
    }
}

/// In-memory session whose endpoint records outgoing calls and keeps
/// registered handlers.
#[derive(Default)]
struct MemoryEndpoint {
    sent: Mutex<Vec<(String, String, Payload)>>,
    handlers: Mutex<HashMap<String, RpcHandler>>,
}

#[async_trait]
impl LocalEndpoint for MemoryEndpoint {
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
        Ok("ack".to_string())
    }

    fn register_rpc_method(&self, method: &str, handler: RpcHandler) {
        self.handlers
            .lock()
            .unwrap()
            .insert(method.to_string(), handler);
    }
}

struct MemorySession {
    endpoint: Arc<MemoryEndpoint>,
    peers: Vec<Peer>,
}

impl MemorySession {
    fn new(peers: Vec<Peer>) -> Arc<Self> {
        Arc::new(Self {
            endpoint: Arc::new(MemoryEndpoint::default()),
            peers,
        })
    }

    fn sent(&self) -> Vec<(String, String, Payload)> {
        self.endpoint.sent.lock().unwrap().clone()
    }

    async fn call_local(&self, method: &str, payload: &str) -> Result<String, RemoteError> {
        let handler = self
            .endpoint
            .handlers
            .lock()
            .unwrap()
            .get(method)
            .cloned()
            .ok_or_else(|| RemoteError::unsupported_method(method))?;
        handler(RpcInvocation::new("p1", payload)).await
    }
}

impl Session for MemorySession {
    fn remote_peers(&self) -> Vec<Peer> {
        self.peers.clone()
    }

    fn local_endpoint(&self) -> Option<Arc<dyn LocalEndpoint>> {
        Some(self.endpoint.clone())
    }
}

fn ctx() -> ChatContext {
    ChatContext::new(vec![ChatMessage::user("say something")])
}

async fn generate_texts(
    agent: &Agent,
    registry: &ExtensionRegistry,
    specs: Vec<ExtensionSpec>,
) -> Vec<String> {
    let report = install_extensions(registry, agent, specs);
    let node = report.node.expect("agent should be patched");
    let stream = node.generate(&ctx(), &[], None).await.unwrap();
    let chunks: Vec<Chunk> = timeout(TEST_TIMEOUT, stream.collect())
        .await
        .expect("generation hung");
    chunks
        .iter()
        .map(|c| extract_text(c).unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn uppercase_then_exclaim() {
    let registry = ExtensionRegistry::new();
    let agent = Agent::new("shouty").with_llm_node(Arc::new(ScriptedNode(vec!["hello", "world"])));

    let texts = generate_texts(
        &agent,
        &registry,
        vec![
            ExtensionSpec::instance(TextStage {
                name: "uppercase",
                map: str::to_uppercase,
            }),
            ExtensionSpec::instance(TextStage {
                name: "exclaim",
                map: |t| format!("{t}!"),
            }),
        ],
    )
    .await;

    assert_eq!(texts, vec!["HELLO!", "WORLD!"]);
}

#[tokio::test]
async fn content_filter_from_registry() {
    let registry = ExtensionRegistry::with_builtins();
    let agent = Agent::new("filtered").with_llm_node(Arc::new(ScriptedNode(vec![
        "This will fail soon",
        "All good here",
    ])));

    let texts = generate_texts(
        &agent,
        &registry,
        vec![ExtensionSpec::named(
            "content_filter",
            serde_json::json!({"terms": ["fail"], "replacement": "[filtered]"}),
        )],
    )
    .await;

    assert_eq!(texts, vec!["[filtered]", "All good here"]);
}

#[tokio::test]
async fn failing_extension_does_not_block_others() {
    struct Broken;

    impl Extension for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn install(&self, _agent: &dyn ExtensibleAgent) -> Result<(), ExtensionError> {
            Err(ExtensionError::InstallFailed {
                name: "broken".to_string(),
                reason: "missing model".to_string(),
            })
        }
    }

    let registry = ExtensionRegistry::with_builtins();
    let agent = Agent::new("mixed")
        .with_llm_node(Arc::new(ScriptedNode(vec!["<think>hmm</think>", "Hi"])));

    let texts = generate_texts(
        &agent,
        &registry,
        vec![
            ExtensionSpec::instance(Broken),
            ExtensionSpec::named("think_filter", serde_json::Value::Null),
            ExtensionSpec::named("does_not_exist", serde_json::Value::Null),
        ],
    )
    .await;

    assert_eq!(texts, vec!["hmmOkay, I'm ready to respond.", "Hi"]);
    assert_eq!(get_state(&agent).installed_names(), vec!["think_filter"]);
}

#[tokio::test]
async fn rpc_registration_before_session_and_send_after() {
    let registry = ExtensionRegistry::with_builtins();
    let agent = Agent::new("caller");
    let report = install_extensions(
        &registry,
        &agent,
        vec![ExtensionSpec::named("rpc", serde_json::Value::Null)],
    );
    assert_eq!(report.installed_names(), vec!["rpc"]);

    let helper = rpc::rpc_helper(&agent).unwrap();
    let echo_helper = Arc::clone(&helper);
    helper.register("agent.echo", move |invocation: RpcInvocation| {
        let loaded = echo_helper.load_payload(&invocation);
        async move {
            match loaded {
                Ok(value) => Ok(value.map(|v| v.to_string()).unwrap_or_default()),
                Err(e) => Err(RemoteError::application(e.to_string())),
            }
        }
    });
    assert_eq!(helper.pending_methods(), vec!["agent.echo"]);
    assert!(matches!(
        helper.send("agent.status", (), None).await,
        Err(RpcError::NotBound)
    ));

    let session = MemorySession::new(vec![Peer::new("p1")]);
    assert!(rpc::bind_on_session_start(&agent, session.clone()));
    assert!(helper.pending_methods().is_empty());

    let echoed = session.call_local("agent.echo", r#"{"a":1}"#).await.unwrap();
    assert_eq!(echoed, r#"{"a":1}"#);

    helper
        .send("agent.status", serde_json::json!({"connected": true}), None)
        .await
        .unwrap();
    assert_eq!(
        session.sent(),
        vec![(
            "p1".to_string(),
            "agent.status".to_string(),
            Payload::Text(r#"{"connected":true}"#.to_string()),
        )]
    );
}

#[tokio::test]
async fn rpc_call_assigns_id_and_runs_body() {
    #[derive(Debug, Serialize, Deserialize)]
    struct Transcript {
        #[serde(default)]
        id: String,
        text: String,
    }

    let registry = ExtensionRegistry::with_builtins();
    let agent = Agent::new("transcriber");
    install_extensions(
        &registry,
        &agent,
        vec![ExtensionSpec::named("rpc", serde_json::Value::Null)],
    );
    let session = MemorySession::new(vec![]);
    rpc::rpc_helper(&agent)
        .unwrap()
        .bind(BindArgs::session(session.clone()).with_default_identity("viewer"));

    let call = RpcCall::<Transcript>::new("agent.transcript").unwrap();
    let seen_id = call
        .invoke(
            &agent,
            Some(CallInput::Record(Transcript {
                id: String::new(),
                text: "hello".to_string(),
            })),
            serde_json::Map::new(),
            |record| async move { record.id },
        )
        .await
        .unwrap();

    let sent = session.sent();
    assert_eq!(sent.len(), 1);
    let (destination, method, payload) = &sent[0];
    assert_eq!(destination, "viewer");
    assert_eq!(method, "agent.transcript");
    let Payload::Text(text) = payload else {
        panic!("expected a text payload");
    };
    let wire: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(wire["id"], serde_json::json!(seen_id));
    assert_eq!(wire["text"], "hello");
    assert!(!seen_id.is_empty());
}
