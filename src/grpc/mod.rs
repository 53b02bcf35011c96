pub mod cluster_service;
pub mod server;

pub use cluster_service::ClusterService;
pub use server::GrpcServer;
