pub mod election;
pub mod log;
pub mod peer;
pub mod replication;
pub mod server;
pub mod state;
pub mod store;
pub mod timer;
pub mod transport;

pub use log::Log;
pub use peer::{Peer, VoteState};
pub use server::Server;
pub use state::{Role, ServerState};
pub use transport::{GrpcTransport, Transport};
