use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{error, info};

use rdis::rdis::commands::Registry;
use rdis::rdis::config::{Cli, ServerConfig};
use rdis::rdis::connection::Connection;
use rdis::rdis::engine::Engine;
use rdis::rdis::types::ResultT;

#[tokio::main(worker_threads = 4)]
async fn main() -> ResultT<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_cli(Cli::parse())?;
    info!("starting as {} on port {}", config.role, config.port);

    let addr = config.bind_addr().parse()?;
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    info!("bound socket to addr {}", addr);

    let listener = socket.listen(1024)?;
    let engine = Engine::new();
    let registry = Arc::new(Registry::new());

    accept_connections(listener, engine, registry).await;
    Ok(())
}

async fn accept_connections(listener: TcpListener, engine: Engine, registry: Arc<Registry>) {
    let client_seq = AtomicU64::new(0);
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let client_id = client_seq.fetch_add(1, Ordering::SeqCst);
                let engine = engine.clone();
                let registry = registry.clone();
                tokio::spawn(handle_connection(stream, peer, client_id, registry, engine));
            }
            Err(err) => {
                error!("accept error: {}", err);
                break;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: std::net::SocketAddr,
    client_id: u64,
    registry: Arc<Registry>,
    engine: Engine,
) {
    Connection::new(stream, peer, client_id).run(registry, engine).await;
}
