//! WebSocket transport for the hub.
//!
//! One background driver task owns the socket. Callers talk to it through a
//! cloneable [`TransportConnection`] handle:
//!
//! ```text
//! ┌───────────────┐     ┌──────────────────┐     ┌─────────────┐
//! │ SessionClient │────▶│ ConnectionDriver │────▶│  Sprut.hub  │
//! │    (Clone)    │     │   (Background)   │     │   server    │
//! └───────────────┘     └────────┬─────────┘     └─────────────┘
//!                                │
//!            ┌───────────────────┴──────────────────┐
//!            ▼                                      ▼
//! ┌─────────────────────┐              ┌────────────────────────┐
//! │ PendingCallRegistry │              │      SessionState      │
//! │   (scc::HashMap)    │              │ (watch + token slot)   │
//! └─────────────────────┘              └────────────────────────┘
//! ```
//!
//! - Responses are matched to calls by integer correlation id.
//! - When the socket closes every pending call fails with `ConnectionLost`,
//!   and the driver reconnects after a fixed delay, forever.
//! - Unsolicited `{event: ...}` frames are logged and broadcast as
//!   [`SessionEvent::Unsolicited`].

mod config;
mod connection;
mod pending;
mod protocol;
mod state;
mod types;

pub use config::WsConfig;
pub use connection::{SessionEvent, TransportConnection};
pub use pending::{PendingCall, PendingCallRegistry};
pub use protocol::{
    INVALID_TOKEN_CODE, InboundFrame, JSONRPC_VERSION, JsonRpcCodec, MessageKind,
    OutboundEnvelope, RpcError, UNKNOWN_ERROR_CODE,
};
pub use state::SessionState;
pub use types::{ConnectionEpoch, CorrelationId, CorrelationIds, LinkState};
