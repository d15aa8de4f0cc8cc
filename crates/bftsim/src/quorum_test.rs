use test_case::test_case;

use crate::quorum::{QuorumThresholds, VoteTracker};
use crate::types::BlockHash;

#[test_case(4, 1; "four nodes")]
#[test_case(8, 2; "eight nodes")]
#[test_case(16, 5; "sixteen nodes")]
#[test_case(32, 10; "thirty two nodes")]
fn cluster_fault_tolerance(num_nodes: usize, expected_f: usize) {
    let thresholds = QuorumThresholds::for_cluster(num_nodes);
    assert_eq!(thresholds.max_faulty(), expected_f);
    assert_eq!(thresholds.prepare(), 2 * expected_f);
    assert_eq!(thresholds.commit(), 2 * expected_f + 1);
}

#[test]
fn commit_quorum_exceeds_prepare_quorum() {
    let thresholds = QuorumThresholds::for_cluster(4);
    assert!(thresholds.commit() > thresholds.prepare());
}

#[test]
fn duplicate_votes_are_not_counted() {
    let hash = BlockHash::digest_of(b"block");
    let mut tracker = VoteTracker::new();

    assert_eq!(tracker.record(hash, 2), 1);
    assert_eq!(tracker.record(hash, 2), 1);
    assert_eq!(tracker.record(hash, 3), 2);
    assert_eq!(tracker.count(&hash), 2);
}

#[test]
fn votes_are_tallied_per_hash() {
    let first = BlockHash::digest_of(b"first");
    let second = BlockHash::digest_of(b"second");
    let mut tracker = VoteTracker::new();

    tracker.record(first, 0);
    tracker.record(second, 0);
    tracker.record(second, 1);

    assert_eq!(tracker.count(&first), 1);
    assert_eq!(tracker.count(&second), 2);
    assert_eq!(tracker.count(&BlockHash::digest_of(b"other")), 0);
}

#[test]
fn removed_hash_resets_the_tally() {
    let hash = BlockHash::digest_of(b"block");
    let mut tracker = VoteTracker::new();

    tracker.record(hash, 0);
    tracker.remove(&hash);
    assert_eq!(tracker.count(&hash), 0);
}
