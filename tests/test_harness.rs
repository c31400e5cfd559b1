//! Test harness for multi-node Raft cluster integration tests.
//!
//! Spawns real servers with real gRPC listeners on localhost ports, each
//! with its own data directory and config file.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;

use raft_registry::raft::{GrpcTransport, Role, Server};

/// Heartbeat interval used by test clusters; short so elections and
/// step-downs resolve quickly.
pub const TEST_HEARTBEAT_MS: i64 = 100;

/// Handle to a running test node.
pub struct TestNode {
    pub name: String,
    pub host: String,
    pub server: Arc<Server>,
    pub transport: Arc<GrpcTransport>,
    #[allow(dead_code)]
    dir: TempDir,
    handle: JoinHandle<()>,
}

impl TestNode {
    pub async fn is_leader(&self) -> bool {
        self.server.state().await == Role::Leader
    }

    /// Data directory of this node, for restart-style tests.
    #[allow(dead_code)]
    pub fn dir_path(&self) -> &std::path::Path {
        self.dir.path()
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.server.stop();
        self.handle.abort();
    }
}

/// A cluster of test nodes sharing one peer list.
pub struct TestCluster {
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    /// Create and start `num_nodes` servers on consecutive ports starting
    /// at `base_port`. Each test should use its own port range.
    pub async fn new(num_nodes: usize, base_port: u16) -> Self {
        let hosts: Vec<String> = (0..num_nodes)
            .map(|i| format!("127.0.0.1:{}", base_port + i as u16))
            .collect();

        let mut nodes = Vec::new();
        for (i, host) in hosts.iter().enumerate() {
            let name = format!("n{}", i + 1);
            nodes.push(Self::start_node(&name, host, &hosts).await);
        }

        // give every listener a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        Self { nodes }
    }

    async fn start_node(name: &str, host: &str, peer_hosts: &[String]) -> TestNode {
        let dir = tempfile::tempdir().unwrap();
        let conf = serde_json::json!({
            "candidate_name": name,
            "host": host,
            "peer_hosts": peer_hosts,
            "log_prefix": "raftlog.",
            "heartbeat_interval_ms": TEST_HEARTBEAT_MS,
        });
        std::fs::write(dir.path().join("raft.cfg"), conf.to_string()).unwrap();

        let transport = Arc::new(GrpcTransport::new());
        let server = Arc::new(Server::new(name, dir.path(), None, transport.clone()));

        let running = server.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = running.start().await {
                tracing::error!(error = %e, "Test node failed to start");
            }
        });

        TestNode {
            name: name.to_string(),
            host: host.to_string(),
            server,
            transport,
            dir,
            handle,
        }
    }

    /// Wait until some node reports Leader; returns its host.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<String> {
        let found = wait_for(
            || async {
                for node in &self.nodes {
                    if node.is_leader().await {
                        return true;
                    }
                }
                false
            },
            timeout,
            Duration::from_millis(50),
        )
        .await;

        if found {
            self.leader_host().await
        } else {
            None
        }
    }

    pub async fn leader_host(&self) -> Option<String> {
        for node in &self.nodes {
            if node.is_leader().await {
                return Some(node.host.clone());
            }
        }
        None
    }

    pub async fn count_leaders(&self) -> usize {
        let mut count = 0;
        for node in &self.nodes {
            if node.is_leader().await {
                count += 1;
            }
        }
        count
    }

    pub fn node(&self, host: &str) -> &TestNode {
        self.nodes
            .iter()
            .find(|n| n.host == host)
            .expect("unknown node host")
    }

    /// Cut every link between `host` and the rest of the cluster, in both
    /// directions.
    pub async fn isolate_node(&self, host: &str) {
        for node in &self.nodes {
            if node.host == host {
                for other in &self.nodes {
                    if other.host != host {
                        node.transport.disconnect(&other.host).await;
                    }
                }
            } else {
                node.transport.disconnect(host).await;
            }
        }
    }

    /// Restore every link between `host` and the rest of the cluster.
    pub async fn heal_node(&self, host: &str) {
        for node in &self.nodes {
            if node.host == host {
                for other in &self.nodes {
                    if other.host != host {
                        node.transport.reconnect(&other.host).await;
                    }
                }
            } else {
                node.transport.reconnect(host).await;
            }
        }
    }
}

/// Wait for a condition to become true with timeout.
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration, poll_interval: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true.
pub async fn assert_eventually<F, Fut>(condition: F, timeout: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout, Duration::from_millis(50)).await;
    assert!(result, "{}", message);
}
