//! Leader election tests over real gRPC clusters.

mod test_harness;

use std::time::Duration;

use raft_registry::raft::Role;
use test_harness::{assert_eventually, TestCluster};

/// A cluster of one is its own quorum: the node walks Follower ->
/// Candidate -> Leader on its own timers.
#[tokio::test]
async fn test_single_node_becomes_leader() {
    let cluster = TestCluster::new(1, 47100).await;

    let leader = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("single node should elect itself");
    assert_eq!(leader, cluster.nodes[0].host);
    assert_eq!(cluster.count_leaders().await, 1);

    // it voted for itself and advanced the term to do so
    assert!(cluster.nodes[0].server.current_term().await >= 1);
}

/// Three fresh nodes elect exactly one leader; the others observe its
/// append rounds and adopt it.
#[tokio::test]
async fn test_three_node_single_leader() {
    let cluster = TestCluster::new(3, 47110).await;

    let leader = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("cluster should elect a leader");

    // followers learn the leader identity through AppendEntries
    assert_eventually(
        || async {
            for node in &cluster.nodes {
                if node.host != leader {
                    if node.server.state().await != Role::Follower {
                        return false;
                    }
                    if node.server.current_leader().await != leader {
                        return false;
                    }
                }
            }
            true
        },
        Duration::from_secs(5),
        "followers should adopt the elected leader",
    )
    .await;

    assert_eq!(cluster.count_leaders().await, 1);
}

/// Terms never run backwards, and everyone converges on the leader's term.
#[tokio::test]
async fn test_terms_are_monotonic() {
    let cluster = TestCluster::new(3, 47120).await;

    cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("cluster should elect a leader");

    let mut observed: Vec<u64> = Vec::new();
    for node in &cluster.nodes {
        observed.push(node.server.current_term().await);
    }

    // sample again after a few heartbeat intervals
    tokio::time::sleep(Duration::from_millis(500)).await;
    for (node, &before) in cluster.nodes.iter().zip(&observed) {
        assert!(
            node.server.current_term().await >= before,
            "term decreased on {}",
            node.name
        );
    }
}
