//! # Sprut Client
//!
//! Async client for the Sprut.hub smart-home controller's JSON-RPC over
//! WebSocket API.
//!
//! ## Features
//!
//! - **Request Multiplexing**: Many concurrent calls over one socket, matched by correlation id
//! - **Lazy Authentication**: Two-step login on first use, single-flight re-login on token expiry
//! - **Auto-Reconnection**: Fixed-delay reconnect forever; in-flight calls fail fast with `ConnectionLost`
//! - **Command Execution**: Allow-listed, validated characteristic updates with normalized results
//! - **Observability**: `tracing` logs and OpenTelemetry counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sprut_client::{SessionClient, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SessionClient::new(SessionConfig::from_env()?)?;
//!     client.connected().await?;
//!
//!     let rooms = client.list_rooms().await?;
//!     println!("{:?}", rooms.data);
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod command;
pub mod config;
pub mod error;
pub mod metrics;
pub mod session;
pub mod websocket;

// Re-export commonly used types
pub use auth::{AuthSession, AuthState, Credentials, RpcTransport};
pub use command::{Command, CommandArgs, CommandOutcome, MethodResponse};
pub use config::SessionConfig;
pub use error::{SprutError, SprutResult};
pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use session::SessionClient;
pub use websocket::{
    ConnectionEpoch, CorrelationId, InboundFrame, LinkState, RpcError, SessionEvent, WsConfig,
};
