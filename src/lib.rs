pub mod api;
pub mod config;
pub mod dns;
pub mod error;
pub mod grpc;
pub mod handlers;
pub mod model;
pub mod node;
pub mod raft;
pub mod rsview;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod worker;

// Generated cluster RPC types
pub mod proto {
    tonic::include_proto!("cluster");
}
