use std::sync::Arc;
use tonic::{Request, Response, Status};

use crate::error::RaftError;
use crate::proto::raft_service_server::RaftService;
use crate::proto::{
    AppendEntriesRequest, AppendEntriesResponse, ApplyRequest, ApplyResponse,
    InstallSnapshotRequest, InstallSnapshotResponse, JoinRequest, JoinResponse, StatusRequest,
    StatusResponse, VoteRequest, VoteResponse,
};
use crate::raft::rpc::membership_to_proto;
use crate::raft::ConsensusService;

/// gRPC service for Raft traffic and cluster management
pub struct ClusterService {
    consensus: Arc<ConsensusService>,
}

impl ClusterService {
    pub fn new(consensus: Arc<ConsensusService>) -> Self {
        Self { consensus }
    }
}

/// Leader hint for failed calls, 0 when unknown.
fn leader_hint(err: &RaftError) -> u64 {
    match err {
        RaftError::NotLeader(Some(id)) => *id,
        _ => 0,
    }
}

#[tonic::async_trait]
impl RaftService for ClusterService {
    async fn request_vote(
        &self,
        request: Request<VoteRequest>,
    ) -> Result<Response<VoteResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!(
            candidate = req.candidate_id,
            term = req.term,
            "Received RequestVote"
        );

        let response = self.consensus.node().handle_vote_request(req).await;
        Ok(Response::new(response))
    }

    async fn append_entries(
        &self,
        request: Request<AppendEntriesRequest>,
    ) -> Result<Response<AppendEntriesResponse>, Status> {
        let req = request.into_inner();
        tracing::trace!(
            leader = req.leader_id,
            term = req.term,
            entries = req.entries.len(),
            is_heartbeat = req.entries.is_empty(),
            "Received AppendEntries"
        );

        let response = self.consensus.node().handle_append_entries(req).await;
        Ok(Response::new(response))
    }

    async fn install_snapshot(
        &self,
        request: Request<InstallSnapshotRequest>,
    ) -> Result<Response<InstallSnapshotResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!(
            leader = req.leader_id,
            index = req.last_included_index,
            bytes = req.data.len(),
            "Received InstallSnapshot"
        );

        let response = self.consensus.node().handle_install_snapshot(req).await;
        Ok(Response::new(response))
    }

    async fn join(&self, request: Request<JoinRequest>) -> Result<Response<JoinResponse>, Status> {
        let req = request.into_inner();
        tracing::info!(node_id = req.node_id, address = %req.address, "Received join request");

        let response = match self.consensus.join(req.node_id, &req.address).await {
            Ok(()) => JoinResponse {
                success: true,
                error: String::new(),
                leader_id: 0,
            },
            Err(e) => JoinResponse {
                success: false,
                leader_id: leader_hint(&e),
                error: e.to_string(),
            },
        };
        Ok(Response::new(response))
    }

    async fn apply(&self, request: Request<ApplyRequest>) -> Result<Response<ApplyResponse>, Status> {
        let command = request.into_inner().command;

        let response = match self.consensus.apply(command).await {
            Ok(index) => ApplyResponse {
                success: true,
                error: String::new(),
                leader_id: 0,
                index,
            },
            Err(e) => ApplyResponse {
                success: false,
                leader_id: leader_hint(&e),
                error: e.to_string(),
                index: 0,
            },
        };
        Ok(Response::new(response))
    }

    async fn status(
        &self,
        _request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let status = self.consensus.status().await;
        Ok(Response::new(StatusResponse {
            node_id: status.node_id,
            role: status.role.to_string(),
            current_term: status.current_term,
            leader_id: status.leader_id.unwrap_or(0),
            commit_index: status.commit_index,
            last_applied: status.last_applied,
            servers: membership_to_proto(&status.membership).servers,
        }))
    }
}
