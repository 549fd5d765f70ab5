//! Session state shared between the client and its connection driver.
//!
//! All mutation goes through the named transition methods; callback bodies
//! never poke at fields directly.

use std::sync::{
    PoisonError, RwLock,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::watch;

use super::types::{ConnectionEpoch, LinkState};
use crate::error::{SprutError, SprutResult};

/// Socket state, session token, and shutdown flag for one client.
#[derive(Debug)]
pub struct SessionState {
    link: watch::Sender<LinkState>,
    token: RwLock<Option<String>>,
    shutdown: AtomicBool,
}

impl SessionState {
    /// Fresh state: connecting, no token.
    pub fn new() -> Self {
        let (link, _) = watch::channel(LinkState::Connecting);
        Self {
            link,
            token: RwLock::new(None),
            shutdown: AtomicBool::new(false),
        }
    }

    /// A connect attempt started.
    pub fn mark_connecting(&self) {
        self.link.send_replace(LinkState::Connecting);
    }

    /// The socket opened. Wakes every `wait_open` caller.
    pub fn mark_open(&self, epoch: ConnectionEpoch) {
        self.link.send_replace(LinkState::Open { epoch });
    }

    /// The socket closed.
    pub fn mark_closed(&self) {
        self.link.send_replace(LinkState::Closed);
    }

    /// The client was shut down; no reconnect will follow.
    pub fn mark_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.link.send_replace(LinkState::Closed);
    }

    /// Whether the client was shut down.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Current socket state.
    pub fn link(&self) -> LinkState {
        *self.link.borrow()
    }

    /// Wait until the socket is open.
    ///
    /// Resolves immediately when already open. Fails with `NotConnected` if
    /// the client is shut down while waiting.
    pub async fn wait_open(&self) -> SprutResult<ConnectionEpoch> {
        let mut rx = self.link.subscribe();
        let state = *rx
            .wait_for(|state| state.is_open() || self.is_shutdown())
            .await
            .map_err(|_| SprutError::not_connected("Session state dropped"))?;

        match state {
            LinkState::Open { epoch } => Ok(epoch),
            _ => Err(SprutError::not_connected("Client is closed")),
        }
    }

    /// Current session token.
    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Store a freshly issued token.
    pub fn set_token(&self, token: String) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    /// Forget the token, e.g. after the hub rejected it.
    pub fn clear_token(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
