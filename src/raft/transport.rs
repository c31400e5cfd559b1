use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;
use tonic::transport::Channel;

use crate::error::{RegistryError, Result};
use crate::proto::raft_client::RaftClient;
use crate::proto::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};

/// Request-reply towards one peer host. The server driver owns all dispatch
/// and passes the peer's `host:port`; implementations handle connection
/// management.
#[tonic::async_trait]
pub trait Transport: Send + Sync {
    async fn request_vote(&self, host: &str, req: VoteRequest) -> Result<VoteResponse>;
    async fn append_entries(
        &self,
        host: &str,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse>;
}

/// gRPC transport. Channels are dialed lazily, cached per host, and dropped
/// on failure so the next round redials.
///
/// `disconnect`/`reconnect` blackhole a host without tearing the cluster
/// down, which is how partition tests cut links.
#[derive(Default)]
pub struct GrpcTransport {
    clients: Mutex<HashMap<String, RaftClient<Channel>>>,
    blocked: Mutex<HashSet<String>>,
}

impl GrpcTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn disconnect(&self, host: &str) {
        self.blocked.lock().await.insert(host.to_string());
        self.clients.lock().await.remove(host);
    }

    pub async fn reconnect(&self, host: &str) {
        self.blocked.lock().await.remove(host);
    }

    async fn ensure_blocked_not(&self, host: &str) -> Result<()> {
        if self.blocked.lock().await.contains(host) {
            return Err(RegistryError::Grpc(tonic::Status::unavailable(format!(
                "host {host} unreachable"
            ))));
        }
        Ok(())
    }

    async fn client(&self, host: &str) -> Result<RaftClient<Channel>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(host) {
            return Ok(client.clone());
        }
        let client = RaftClient::connect(format!("http://{host}")).await?;
        clients.insert(host.to_string(), client.clone());
        Ok(client)
    }

    async fn drop_client(&self, host: &str) {
        self.clients.lock().await.remove(host);
    }
}

#[tonic::async_trait]
impl Transport for GrpcTransport {
    async fn request_vote(&self, host: &str, req: VoteRequest) -> Result<VoteResponse> {
        self.ensure_blocked_not(host).await?;
        let mut client = self.client(host).await?;
        match client.request_vote(req).await {
            Ok(resp) => Ok(resp.into_inner()),
            Err(status) => {
                self.drop_client(host).await;
                Err(status.into())
            }
        }
    }

    async fn append_entries(
        &self,
        host: &str,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        self.ensure_blocked_not(host).await?;
        let mut client = self.client(host).await?;
        match client.append_entries(req).await {
            Ok(resp) => Ok(resp.into_inner()),
            Err(status) => {
                self.drop_client(host).await;
                Err(status.into())
            }
        }
    }
}
