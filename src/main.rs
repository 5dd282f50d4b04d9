use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

use agent_extensions::chunk::{Chunk, extract_text, inject_text};
use agent_extensions::config::ExtensionsConfig;
use agent_extensions::error::{ExtensionError, GenerationError, RemoteError, RpcError};
use agent_extensions::extensions::builtin::{ContentFilter, UrlExtractor};
use agent_extensions::extensions::{
    ExtensionConstructor, ExtensionRegistry, ExtensionSpec, StaticDiscovery, get_state,
    install_extensions,
};
use agent_extensions::generation::{
    ChatContext, ChatMessage, LlmNode, ModelSettings, NodeOutput, ToolDefinition,
};
use agent_extensions::pipeline::map_stage;
use agent_extensions::rpc::{
    self, BroadcastOptions, BroadcastOutcome, CallInput, Json, LocalEndpoint, Payload, Peer,
    RpcCall, RpcHandler, RpcInvocation, Session,
};
use agent_extensions::{Agent, Extension, ExtensibleAgent};

/// Streams the last user message back word by word.
struct EchoNode;

#[async_trait]
impl LlmNode for EchoNode {
    async fn llm_node(
        &self,
        chat_ctx: &ChatContext,
        _tools: &[ToolDefinition],
        _settings: Option<&ModelSettings>,
    ) -> Result<NodeOutput, GenerationError> {
        let prompt = chat_ctx
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let (tx, rx) = mpsc::unbounded_channel();
        let id = uuid::Uuid::new_v4().to_string();
        tokio::spawn(async move {
            for word in prompt.split_inclusive(' ') {
                if tx.send(Chunk::delta(id.clone(), word)).is_err() {
                    break;
                }
            }
        });
        Ok(NodeOutput::Stream(Box::pin(UnboundedReceiverStream::new(rx))))
    }
}

/// Loopback endpoint: the "viewer" peer accepts a fixed set of methods,
/// everything else is unsupported.
#[derive(Default)]
struct LoopbackEndpoint {
    handlers: Mutex<HashMap<String, RpcHandler>>,
}

impl LoopbackEndpoint {
    /// Deliver an incoming call to a locally registered handler.
    async fn deliver(&self, method: &str, invocation: RpcInvocation) -> Result<String, RemoteError> {
        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned()
            .ok_or_else(|| RemoteError::unsupported_method(method))?;
        handler(invocation).await
    }
}

#[async_trait]
impl LocalEndpoint for LoopbackEndpoint {
    async fn perform_rpc(
        &self,
        destination: &str,
        method: &str,
        payload: Payload,
    ) -> Result<String, RemoteError> {
        if destination != "viewer" {
            return Err(RemoteError::new(
                RemoteError::RECIPIENT_NOT_FOUND,
                format!("no participant {destination}"),
            ));
        }
        match method {
            "agent.status" | "agent.transcript" => {
                info!(
                    method = %method,
                    payload = %payload.as_text().unwrap_or_default(),
                    "Viewer received call"
                );
                Ok("ok".to_string())
            }
            _ => Err(RemoteError::unsupported_method(method)),
        }
    }

    fn register_rpc_method(&self, method: &str, handler: RpcHandler) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.to_string(), handler);
    }
}

struct DemoSession {
    endpoint: Arc<LoopbackEndpoint>,
}

impl Session for DemoSession {
    fn remote_peers(&self) -> Vec<Peer> {
        vec![Peer::agent("observer-agent"), Peer::new("viewer")]
    }

    fn local_endpoint(&self) -> Option<Arc<dyn LocalEndpoint>> {
        Some(self.endpoint.clone())
    }
}

/// Appends an exclamation mark to every fragment.
struct Shout;

impl Extension for Shout {
    fn name(&self) -> &str {
        "shout"
    }

    fn install(&self, agent: &dyn ExtensibleAgent) -> Result<(), ExtensionError> {
        get_state(agent)
            .pipeline
            .add(map_stage("shout", |chunk: Chunk| {
                let text = extract_text(&chunk).map(|t| format!("{}!", t.trim_end()));
                Ok(match text {
                    Some(text) => inject_text(chunk, text),
                    None => chunk,
                })
            }));
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TranscriptEvent {
    #[serde(default)]
    id: String,
    text: String,
    timestamp: String,
}

#[derive(Serialize)]
struct StatusPayload {
    agent: String,
    connected: bool,
    timestamp: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let prompt = if prompt.is_empty() {
        "<think>checking</think> this might fail, see https://example.com".to_string()
    } else {
        prompt
    };

    run(prompt).await?;
    Ok(())
}

async fn run(prompt: String) -> agent_extensions::Result<()> {
    let config = ExtensionsConfig::from_env()?;

    eprintln!("Agent Extensions demo v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Discovery group: {}", config.discovery_group);
    eprintln!("   RPC retry: {:?}", config.rpc_retry_interval);

    // ── Registry ─────────────────────────────────────────────────────────
    let registry = ExtensionRegistry::with_builtins();
    let discovery = StaticDiscovery::new().with_entry(&config.discovery_group, "shout", || {
        let constructor: ExtensionConstructor = Arc::new(|_: &serde_json::Value| {
            Ok::<_, ExtensionError>(Arc::new(Shout) as Arc<dyn Extension>)
        });
        Ok(constructor)
    });
    registry.discover(&discovery, &config.discovery_group);
    info!(extensions = ?registry.names(), "Registry ready");

    // ── Agent ────────────────────────────────────────────────────────────
    let agent = Agent::new("demo-agent")
        .with_instructions("Echo the user back.")
        .with_llm_node(Arc::new(EchoNode));

    let report = install_extensions(
        &registry,
        &agent,
        vec![
            ExtensionSpec::named(
                "rpc",
                serde_json::json!({
                    "retry_interval_ms": config.rpc_retry_interval.as_millis() as u64,
                }),
            ),
            ExtensionSpec::named("think_filter", serde_json::Value::Null),
            ExtensionSpec::instance(ContentFilter::new(config.content_filter.clone())?),
            ExtensionSpec::named("extract_urls", serde_json::Value::Null),
            ExtensionSpec::named("shout", serde_json::Value::Null),
        ],
    );
    info!(installed = ?report.installed_names(), "Extensions installed");

    let state = get_state(&agent);
    let helper = rpc::rpc_helper(&agent).ok_or(RpcError::NotInstalled)?;

    // Registered before any session exists; flushed on bind.
    let ping_helper = Arc::clone(&helper);
    helper.register("agent.ping", move |invocation: RpcInvocation| {
        let body = ping_helper.payload_text(&invocation).unwrap_or_default();
        async move { Ok::<_, RemoteError>(format!("pong from demo-agent: {body}")) }
    });
    info!(pending = ?helper.pending_methods(), "RPC methods queued");

    // ── Session ──────────────────────────────────────────────────────────
    let endpoint = Arc::new(LoopbackEndpoint::default());
    let session: Arc<dyn Session> = Arc::new(DemoSession {
        endpoint: Arc::clone(&endpoint),
    });
    rpc::bind_on_session_start(&agent, session);

    let pong = endpoint
        .deliver("agent.ping", RpcInvocation::new("viewer", "hello"))
        .await
        .map_err(|source| RpcError::Remote {
            destination: "demo-agent".to_string(),
            source,
        })?;
    info!(response = %pong, "Handled incoming call");

    let status = StatusPayload {
        agent: agent.name().to_string(),
        connected: true,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    let outcome = helper
        .broadcast("agent.status", Json(status), BroadcastOptions::default())
        .await?;
    info!(outcome = ?outcome, "Status broadcast");
    if let BroadcastOutcome::Delivered { identity, .. } = outcome {
        helper.set_default_identity(Some(identity));
    }

    // ── Generation ───────────────────────────────────────────────────────
    let Some(node) = report.node else {
        warn!("Agent was not patched; nothing to generate");
        return Ok(());
    };
    let ctx = ChatContext::new(vec![
        ChatMessage::system(agent.instructions()),
        ChatMessage::user(prompt),
    ]);
    let reply: Vec<Chunk> = node.generate(&ctx, &[], None).await?.collect().await;
    let text: String = reply.iter().filter_map(extract_text).collect();
    println!("{text}");

    if let Some(extractor) = state.helpers.get::<UrlExtractor>("extract_urls") {
        info!(urls = ?extractor.extract(&text), "URLs in reply");
    }

    let transcript = RpcCall::<TranscriptEvent>::new("agent.transcript")?
        .with_id_field(config.rpc_id_field.clone());
    let event = TranscriptEvent {
        id: String::new(),
        text,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    transcript
        .invoke(
            &agent,
            Some(CallInput::Record(event)),
            serde_json::Map::new(),
            |event| async move {
                info!(id = %event.id, "Transcript sent");
            },
        )
        .await?;

    helper.shutdown();
    Ok(())
}
