use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tonic::{Request, Response, Status};

use crate::proto::raft_server::Raft;
use crate::proto::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::raft::Server;

/// gRPC service for Raft communication between registry nodes.
pub struct ClusterService {
    server: Arc<Server>,
}

impl ClusterService {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }
}

#[tonic::async_trait]
impl Raft for ClusterService {
    async fn request_vote(
        &self,
        request: Request<VoteRequest>,
    ) -> Result<Response<VoteResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!(
            candidate = %req.candidate_name,
            term = req.term,
            "Received RequestVote"
        );

        let server = self.server.clone();
        let result = AssertUnwindSafe(async { server.handle_request_vote(req).await })
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(response)) => Ok(Response::new(response)),
            Ok(Err(e)) => Err(Status::internal(format!("RequestVote handler error: {e}"))),
            Err(_) => {
                tracing::error!("Panic in RequestVote handler");
                Err(Status::internal("Internal error in RequestVote handler"))
            }
        }
    }

    async fn append_entries(
        &self,
        request: Request<AppendEntriesRequest>,
    ) -> Result<Response<AppendEntriesResponse>, Status> {
        let req = request.into_inner();
        let is_heartbeat = req.entries.is_empty();
        tracing::trace!(
            leader = %req.leader_name,
            term = req.term,
            entries = req.entries.len(),
            is_heartbeat,
            "Received AppendEntries"
        );

        let server = self.server.clone();
        let result = AssertUnwindSafe(async { server.handle_append_entries(req).await })
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(response)) => Ok(Response::new(response)),
            Ok(Err(e)) => Err(Status::internal(format!(
                "AppendEntries handler error: {e}"
            ))),
            Err(_) => {
                tracing::error!("Panic in AppendEntries handler");
                Err(Status::internal("Internal error in AppendEntries handler"))
            }
        }
    }
}
