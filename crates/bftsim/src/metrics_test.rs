use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::metrics::{MetricsSnapshot, ReplicaMetrics};

#[test]
fn fresh_metrics_are_zero() {
    assert_eq!(ReplicaMetrics::new().snapshot(), MetricsSnapshot::default());
}

#[test]
fn commits_accumulate_with_latencies() {
    let metrics = ReplicaMetrics::new();
    metrics.add_commit(Duration::from_millis(25));
    metrics.add_commit(Duration::from_millis(75));

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.commits, 2);
    assert_eq!(snapshot.latencies_ms, vec![25.0, 75.0]);
}

#[test]
fn bytes_sent_is_monotonic() {
    let metrics = ReplicaMetrics::new();
    let mut last = 0;
    for chunk in [10usize, 0, 1400, 68] {
        metrics.add_bytes_sent(chunk);
        let current = metrics.snapshot().bytes_sent;
        assert!(current >= last);
        last = current;
    }
    assert_eq!(last, 1478);
}

#[test]
fn view_changes_count_up() {
    let metrics = ReplicaMetrics::new();
    metrics.inc_view_changes();
    metrics.inc_view_changes();
    assert_eq!(metrics.snapshot().view_changes, 2);
}

#[test]
fn snapshot_is_a_detached_copy() {
    let metrics = ReplicaMetrics::new();
    metrics.add_bytes_sent(5);
    let before = metrics.snapshot();
    metrics.add_bytes_sent(5);
    assert_eq!(before.bytes_sent, 5);
    assert_eq!(metrics.snapshot().bytes_sent, 10);
}
