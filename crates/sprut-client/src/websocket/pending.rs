//! Lock-free pending call registry using `scc::HashMap`.
//!
//! Tracks outgoing calls awaiting a response, keyed by correlation id, with
//! deadline eviction and bulk rejection when the socket goes away.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::oneshot;
use tracing::warn;

use super::{config::WsConfig, protocol::InboundFrame, types::CorrelationId};
use crate::error::{SprutError, SprutResult};

/// A call awaiting its response.
pub struct PendingCall {
    /// Channel to settle the caller's future.
    pub response_tx: oneshot::Sender<SprutResult<InboundFrame>>,
    /// When this call was registered.
    pub created_at: Instant,
    /// Deadline for this specific call.
    pub timeout: Duration,
}

impl PendingCall {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.timeout
    }
}

/// Registry of outstanding calls.
///
/// Every entry is settled exactly once: by its response, by its deadline, or
/// by the socket closing.
pub struct PendingCallRegistry {
    calls: scc::HashMap<CorrelationId, PendingCall>,
    config: Arc<WsConfig>,
}

impl PendingCallRegistry {
    /// Create a new registry.
    pub fn new(config: Arc<WsConfig>) -> Self {
        Self {
            calls: scc::HashMap::new(),
            config,
        }
    }

    /// Register a call.
    ///
    /// Returns the receiver that settles when the call completes, or `None`
    /// if the registry is full or `id` is already pending.
    pub fn add(
        &self,
        id: CorrelationId,
        timeout: Option<Duration>,
    ) -> Option<oneshot::Receiver<SprutResult<InboundFrame>>> {
        if self.calls.len() >= self.config.max_pending_requests {
            return None;
        }

        let (tx, rx) = oneshot::channel();
        let pending = PendingCall {
            response_tx: tx,
            created_at: Instant::now(),
            timeout: timeout.unwrap_or(self.config.request_timeout),
        };

        if self.calls.insert_sync(id, pending).is_err() {
            return None;
        }

        Some(rx)
    }

    /// Settle the call registered under `id` and drop the entry.
    ///
    /// Returns `false` for an unknown id (late or duplicate frame).
    pub fn resolve(&self, id: &CorrelationId, outcome: SprutResult<InboundFrame>) -> bool {
        if let Some((_, pending)) = self.calls.remove_sync(id) {
            // Receiver may have given up already.
            let _ = pending.response_tx.send(outcome);
            return true;
        }
        warn!(id = %id, "No pending call for response id");
        false
    }

    /// Discard an entry without settling it. Idempotent.
    pub fn remove(&self, id: &CorrelationId) -> bool {
        self.calls.remove_sync(id).is_some()
    }

    /// Whether `id` is still waiting for a response.
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.calls.get_sync(id).is_some()
    }

    /// Settle every expired call with a `Timeout` error.
    ///
    /// Returns the number of calls that timed out.
    pub fn expire_stale(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();

        self.calls.retain_sync(|id, pending| {
            if pending.is_expired(now) {
                expired.push(*id);
            }
            true
        });

        let mut settled = 0;
        for id in expired {
            if let Some((_, pending)) = self.calls.remove_sync(&id) {
                let _ = pending
                    .response_tx
                    .send(Err(SprutError::timeout(pending.timeout, id.to_string())));
                settled += 1;
            }
        }
        settled
    }

    /// Reject every pending call with `ConnectionLost`.
    ///
    /// Called the moment the socket closes.
    pub fn fail_all(&self, reason: &str) -> usize {
        let mut ids = Vec::new();
        self.calls.retain_sync(|id, _| {
            ids.push(*id);
            true
        });

        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.calls.remove_sync(&id) {
                let _ = pending
                    .response_tx
                    .send(Err(SprutError::connection_lost(reason)));
                failed += 1;
            }
        }
        failed
    }

    /// Check if there's capacity for more calls.
    pub fn has_capacity(&self) -> bool {
        self.calls.len() < self.config.max_pending_requests
    }

    /// Get the current number of pending calls.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn test_config() -> Arc<WsConfig> {
        Arc::new(WsConfig::new("ws://hub.local").max_pending_requests(10))
    }

    fn frame(id: u64) -> InboundFrame {
        InboundFrame::from_value(json!({"id": id, "result": {}})).expect("frame")
    }

    #[tokio::test]
    async fn test_add_and_resolve() {
        let registry = PendingCallRegistry::new(test_config());
        let id = CorrelationId::new(1);

        let rx = registry.add(id, None).expect("registered");
        assert_eq!(registry.len(), 1);

        assert!(registry.resolve(&id, Ok(frame(1))));
        assert_eq!(registry.len(), 0);

        let settled = rx.await.expect("settled").expect("ok");
        assert_eq!(settled.id(), Some(id));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = PendingCallRegistry::new(test_config());
        let id = CorrelationId::new(5);

        assert!(registry.add(id, None).is_some());
        assert!(registry.add(id, None).is_none());
        assert!(registry.contains(&id));
    }

    #[test]
    fn test_capacity_limit() {
        let registry = PendingCallRegistry::new(test_config());

        let _receivers: Vec<_> = (1..=10)
            .map(|raw| registry.add(CorrelationId::new(raw), None))
            .collect();

        assert!(registry.add(CorrelationId::new(11), None).is_none());
        assert!(!registry.has_capacity());
    }

    #[test]
    fn test_resolve_unknown_id_is_noop() {
        let registry = PendingCallRegistry::new(test_config());
        assert!(!registry.resolve(&CorrelationId::new(99), Ok(frame(99))));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = PendingCallRegistry::new(test_config());
        let id = CorrelationId::new(3);
        let _rx = registry.add(id, None);

        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_expire_stale_settles_with_timeout() {
        let registry = PendingCallRegistry::new(test_config());
        let stale = CorrelationId::new(1);
        let fresh = CorrelationId::new(2);

        let stale_rx = registry
            .add(stale, Some(Duration::from_millis(1)))
            .expect("stale");
        let _fresh_rx = registry.add(fresh, Some(Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.expire_stale(), 1);
        assert!(registry.contains(&fresh));

        let outcome = stale_rx.await.expect("settled");
        assert!(matches!(outcome, Err(SprutError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_fail_all_rejects_with_connection_lost() {
        let registry = PendingCallRegistry::new(test_config());
        let rx1 = registry.add(CorrelationId::new(1), None).expect("rx1");
        let rx2 = registry.add(CorrelationId::new(2), None).expect("rx2");

        assert_eq!(registry.fail_all("socket closed"), 2);
        assert!(registry.is_empty());

        for rx in [rx1, rx2] {
            let outcome = rx.await.expect("settled");
            assert!(matches!(outcome, Err(SprutError::ConnectionLost { .. })));
        }
    }
}
