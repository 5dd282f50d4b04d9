//! RPC helper: lazy session binding, deferred method registration, payload
//! normalization, broadcast and declarative outbound calls.

mod broadcast;
mod call;
mod extension;
mod helper;
pub mod payload;
pub mod session;

pub use broadcast::{BroadcastOptions, BroadcastOutcome};
pub use call::{CallInput, RpcCall};
pub use extension::{RpcExtension, bind_on_session_start, rpc_helper};
pub use helper::{BindArgs, RpcHelper};
pub use payload::{IntoPayload, Json, Payload, ensure_id};
pub use session::{JobContext, LocalEndpoint, Peer, PeerKind, RpcHandler, RpcInvocation, Session};

/// Helper slot the `rpc` extension installs its [`RpcHelper`] under.
pub const RPC_HELPER: &str = "rpc";
