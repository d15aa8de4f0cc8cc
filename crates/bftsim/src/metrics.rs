//! Per-replica performance counters.
//!
//! Every replica owns one [`ReplicaMetrics`]; the protocol records into it
//! while the driver reads end-of-run [`MetricsSnapshot`]s. Accesses are
//! serialized by a mutex held only for synchronous updates.

use std::sync::Mutex;
use std::time::Duration;

#[cfg(test)]
#[path = "metrics_test.rs"]
mod metrics_test;

/// Thread-safe accumulator for one replica.
#[derive(Debug, Default)]
pub struct ReplicaMetrics {
    inner: Mutex<MetricsSnapshot>,
}

/// Plain copy of a replica's counters at one point in time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub commits: usize,
    pub bytes_sent: u64,
    pub view_changes: usize,
    /// Commit latency samples, milliseconds, in commit order.
    pub latencies_ms: Vec<f64>,
}

impl ReplicaMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one committed block and its proposal-to-commit latency.
    pub fn add_commit(&self, latency: Duration) {
        let mut inner = self.inner.lock().expect("metrics mutex poisoned");
        inner.commits += 1;
        inner.latencies_ms.push(latency.as_secs_f64() * 1000.0);
    }

    pub fn add_bytes_sent(&self, bytes: usize) {
        let mut inner = self.inner.lock().expect("metrics mutex poisoned");
        inner.bytes_sent += u64::try_from(bytes).expect("byte counts fit in u64");
    }

    pub fn inc_view_changes(&self) {
        self.inner.lock().expect("metrics mutex poisoned").view_changes += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().expect("metrics mutex poisoned").clone()
    }
}
