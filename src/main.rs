use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use raft_registry::raft::{GrpcTransport, Server};
use raft_registry::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "raft-registry")]
#[command(about = "A Raft-replicated registry of worker nodes")]
struct Args {
    /// Node name (unique identifier for this node)
    #[arg(long)]
    name: String,

    /// Data directory holding the config, log, and snapshot files
    #[arg(long, default_value = ".")]
    path: PathBuf,

    /// Config filename inside the data directory (defaults to raft.cfg)
    #[arg(long)]
    conf: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    tracing::info!(
        name = %args.name,
        path = %args.path.display(),
        conf = args.conf.as_deref().unwrap_or("raft.cfg"),
        "Starting raft-registry node"
    );

    let shutdown = install_shutdown_handler();
    let transport = Arc::new(GrpcTransport::new());
    let server = Arc::new(Server::new(
        &args.name,
        &args.path,
        args.conf.as_deref(),
        transport,
    ));

    let stopper = server.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        stopper.stop();
    });

    server.start().await?;

    Ok(())
}
