//! Error types for the extension runtime.

/// Top-level error type for the extension runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Extension error: {0}")]
    Extension(#[from] ExtensionError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Extension registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Extension '{name}' already registered")]
    DuplicateName { name: String },

    #[error("Extension '{name}' is not registered")]
    UnknownExtension { name: String },

    #[error("Extension '{name}' could not be constructed: {source}")]
    Construction {
        name: String,
        #[source]
        source: ExtensionError,
    },
}

/// Errors raised while resolving or installing an extension.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("Invalid configuration for extension {name}: {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("Extension {name} install failed: {reason}")]
    InstallFailed { name: String, reason: String },

    #[error("Extension spec could not be resolved: {reason}")]
    ResolutionFailed { reason: String },

    #[error("Extension {name} panicked during {phase}")]
    Panicked { name: String, phase: &'static str },

    #[error("Registry error: {0}")]
    Registry(Box<RegistryError>),
}

impl From<RegistryError> for ExtensionError {
    fn from(err: RegistryError) -> Self {
        Self::Registry(Box::new(err))
    }
}

/// RPC helper errors.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("RPC helper is not bound to a session with a local endpoint")]
    NotBound,

    #[error("RPC helper could not determine a destination identity; pass one explicitly")]
    NoDestination,

    #[error("Invalid JSON payload {payload:?}: {reason}")]
    InvalidPayload { payload: String, reason: String },

    #[error("RPC helper is not installed on this agent")]
    NotInstalled,

    #[error("RPC call methods do not accept both a payload and keyword fields")]
    PayloadConflict,

    #[error("Unsupported payload: {0}")]
    UnsupportedPayload(String),

    #[error("RPC call requires a topic")]
    EmptyTopic,

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Remote call to {destination} failed: {source}")]
    Remote {
        destination: String,
        #[source]
        source: RemoteError,
    },
}

/// Error reported by the session's addressed-call primitive or by a remote
/// method handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("RPC error {code}: {message}")]
pub struct RemoteError {
    pub code: u32,
    pub message: String,
    pub data: Option<String>,
}

impl RemoteError {
    pub const APPLICATION_ERROR: u32 = 1500;
    pub const CONNECTION_TIMEOUT: u32 = 1501;
    pub const RESPONSE_TIMEOUT: u32 = 1502;
    pub const RECIPIENT_DISCONNECTED: u32 = 1503;
    pub const UNSUPPORTED_METHOD: u32 = 1400;
    pub const RECIPIENT_NOT_FOUND: u32 = 1401;

    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Application-level failure raised by a method handler.
    pub fn application(message: impl Into<String>) -> Self {
        Self::new(Self::APPLICATION_ERROR, message)
    }

    pub fn unsupported_method(method: &str) -> Self {
        Self::new(
            Self::UNSUPPORTED_METHOD,
            format!("Method not supported at destination: {method}"),
        )
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn is_unsupported_method(&self) -> bool {
        self.code == Self::UNSUPPORTED_METHOD
    }
}

/// Errors from the host's generation node.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Generation node failed: {0}")]
    Node(#[from] anyhow::Error),
}

/// Result type alias for the extension runtime.
pub type Result<T> = std::result::Result<T, Error>;
