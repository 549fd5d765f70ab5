//! Core type definitions for the hub connection.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

/// Integer tag linking an outbound request to its inbound response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Wrap a raw id, e.g. one parsed from an inbound frame.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw integer value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CorrelationId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Process-wide monotonic id source.
///
/// Never reset across reconnects, so a late response from a previous socket
/// can never match a call issued on the current one.
#[derive(Debug)]
pub struct CorrelationIds {
    next: AtomicU64,
}

impl CorrelationIds {
    /// Start counting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Hand out the next id.
    pub fn next_id(&self) -> CorrelationId {
        CorrelationId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequence number of an opened socket. Bumped on every successful connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionEpoch(pub u64);

impl fmt::Display for ConnectionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Socket lifecycle as observed by callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// A connect attempt is in progress.
    Connecting,
    /// The socket is open and accepting calls.
    Open {
        /// Epoch of the open socket.
        epoch: ConnectionEpoch,
    },
    /// No socket. A reconnect may be scheduled unless the client was shut down.
    Closed,
}

impl LinkState {
    /// Check if calls can be sent.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}
