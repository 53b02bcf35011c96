use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::grpc::cluster_service::ClusterService;
use crate::proto::raft_service_server::RaftServiceServer;
use crate::raft::ConsensusService;

pub struct GrpcServer {
    addr: SocketAddr,
    consensus: Arc<ConsensusService>,
}

impl GrpcServer {
    pub fn new(addr: SocketAddr, consensus: Arc<ConsensusService>) -> Self {
        Self { addr, consensus }
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), tonic::transport::Error> {
        let cluster_service = ClusterService::new(self.consensus);

        tracing::info!(addr = %self.addr, "Starting gRPC server");

        Server::builder()
            .add_service(RaftServiceServer::new(cluster_service))
            .serve_with_shutdown(self.addr, shutdown.cancelled_owned())
            .await
    }
}
