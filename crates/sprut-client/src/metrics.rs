//! Session counters.
//!
//! Each counter is kept locally (for `SessionClient::metrics()` snapshots)
//! and mirrored to the global OpenTelemetry meter. Without an installed meter
//! provider the OpenTelemetry side is a no-op.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};

/// Point-in-time copy of the session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub calls: u64,
    pub reauthentications: u64,
    pub reconnects: u64,
    pub timeouts: u64,
}

#[derive(Debug, Default)]
struct LocalCounters {
    calls: AtomicU64,
    reauthentications: AtomicU64,
    reconnects: AtomicU64,
    timeouts: AtomicU64,
}

/// Counters for calls, re-authentications, reconnects and timeouts.
#[derive(Clone)]
pub struct SessionMetrics {
    local: Arc<LocalCounters>,
    otlp_calls: Counter<u64>,
    otlp_reauthentications: Counter<u64>,
    otlp_reconnects: Counter<u64>,
    otlp_timeouts: Counter<u64>,
    otlp_call_latency: Histogram<f64>,
}

impl SessionMetrics {
    /// Create counters on the global meter.
    pub fn new() -> Self {
        let meter = global::meter("sprut-client");
        Self {
            local: Arc::new(LocalCounters::default()),
            otlp_calls: meter
                .u64_counter("sprut.calls")
                .with_description("Total number of RPC calls sent to the hub")
                .build(),
            otlp_reauthentications: meter
                .u64_counter("sprut.reauthentications")
                .with_description("Login sequences run to obtain a session token")
                .build(),
            otlp_reconnects: meter
                .u64_counter("sprut.reconnects")
                .with_description("Reconnect attempts after the socket closed")
                .build(),
            otlp_timeouts: meter
                .u64_counter("sprut.timeouts")
                .with_description("Calls that exceeded their deadline")
                .build(),
            otlp_call_latency: meter
                .f64_histogram("sprut.call.duration")
                .with_unit("s")
                .with_description("Round-trip time of answered calls")
                .build(),
        }
    }

    pub(crate) fn record_call(&self, method: &str) {
        self.local.calls.fetch_add(1, Ordering::Relaxed);
        self.otlp_calls
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    pub(crate) fn record_latency(&self, elapsed: Duration) {
        self.otlp_call_latency.record(elapsed.as_secs_f64(), &[]);
    }

    pub(crate) fn record_reauthentication(&self) {
        self.local.reauthentications.fetch_add(1, Ordering::Relaxed);
        self.otlp_reauthentications.add(1, &[]);
    }

    pub(crate) fn record_reconnect(&self) {
        self.local.reconnects.fetch_add(1, Ordering::Relaxed);
        self.otlp_reconnects.add(1, &[]);
    }

    pub(crate) fn record_timeout(&self) {
        self.local.timeouts.fetch_add(1, Ordering::Relaxed);
        self.otlp_timeouts.add(1, &[]);
    }

    /// Read the local counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls: self.local.calls.load(Ordering::Relaxed),
            reauthentications: self.local.reauthentications.load(Ordering::Relaxed),
            reconnects: self.local.reconnects.load(Ordering::Relaxed),
            timeouts: self.local.timeouts.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_clones() {
        let metrics = SessionMetrics::new();
        let clone = metrics.clone();

        metrics.record_call("server.version");
        clone.record_call("hub.list");
        clone.record_reauthentication();
        metrics.record_reconnect();
        metrics.record_timeout();
        metrics.record_latency(Duration::from_millis(12));

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                calls: 2,
                reauthentications: 1,
                reconnects: 1,
                timeouts: 1,
            }
        );
    }
}
