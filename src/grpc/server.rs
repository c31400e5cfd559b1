use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tonic::transport::Server as TonicServer;

use crate::grpc::ClusterService;
use crate::proto::raft_server::RaftServer;
use crate::raft::Server;

/// The inbound RPC listener: serves the Raft service until the shutdown
/// token fires.
pub struct RpcServer {
    addr: SocketAddr,
    server: Arc<Server>,
}

impl RpcServer {
    pub fn new(addr: SocketAddr, server: Arc<Server>) -> Self {
        Self { addr, server }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<(), tonic::transport::Error> {
        let cluster_service = ClusterService::new(self.server.clone());

        tracing::info!(addr = %self.addr, "Starting gRPC listener");

        TonicServer::builder()
            .add_service(RaftServer::new(cluster_service))
            .serve_with_shutdown(self.addr, async move {
                shutdown.cancelled().await;
            })
            .await
    }
}
