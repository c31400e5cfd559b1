pub mod raft_service;
pub mod server;

pub use raft_service::ClusterService;
pub use server::RpcServer;
