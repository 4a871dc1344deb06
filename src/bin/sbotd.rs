//! `sbotd`: the node daemon. Wires up logging, configuration, the store,
//! the inbound replication listener, the outbound dial loop, and the
//! localhost JSON-RPC front door.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use delta_ssb::{config::Config, transport, Store};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sbotd", about = "gossip-replicated signed-log social network node")]
struct Cli {
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node: listen for replication peers, dial known pubs, serve
    /// the localhost JSON-RPC front door.
    Run,
    /// Rebuild one or all index plug-ins from the global log.
    Rebuild {
        #[arg(default_value = "all")]
        module: String,
    },
    /// Sign and publish a JSON message on our own feed.
    Publish { json: String },
    /// Print our own feed reference.
    Whoami,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let identity = delta_ssb::config::load_or_create_identity(&config.secret_path())?;
    let store = Arc::new(delta_ssb::open_store(&config.database_path(), identity_clone(&identity))?);

    match cli.command {
        Command::Whoami => {
            println!("{}", store.identity_ref());
        }
        Command::Rebuild { module } => {
            if module == "all" {
                store.rebuild_all()?;
            } else {
                store.rebuild(&module)?;
            }
        }
        Command::Publish { json } => {
            let content: serde_json::Value = serde_json::from_str(&json)?;
            let msg = store.publish(content).await?;
            println!("{}", msg.key()?);
        }
        Command::Run => {
            run(store, identity, config).await?;
        }
    }
    Ok(())
}

fn identity_clone(key: &ed25519_dalek::SigningKey) -> ed25519_dalek::SigningKey {
    ed25519_dalek::SigningKey::from_bytes(&key.to_bytes())
}

async fn run(store: Arc<Store>, identity: ed25519_dalek::SigningKey, config: Config) -> anyhow::Result<()> {
    let blobs = Arc::new(delta_ssb::blob::BlobStore::open(config.blob_store_path())?);
    let peers = delta_ssb::peers::PeerRegistry::new();

    let mut registry = delta_ssb::rpc::methods::MethodRegistry::new();
    delta_ssb::rpc::methods::register_builtins(&mut registry, store.clone(), blobs.clone());
    let registry = Arc::new(registry);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "listening for replication peers");

    {
        let store = store.clone();
        let identity = identity_clone(&identity);
        let registry = registry.clone();
        let peers = peers.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, peer)) = listener.accept().await else {
                    continue;
                };
                let store = store.clone();
                let identity = identity_clone(&identity);
                let registry = registry.clone();
                let peers = peers.clone();
                tokio::spawn(async move {
                    match transport::accept(socket, &identity, transport::DEFAULT_CAPS).await {
                        Ok(conn) => {
                            let peer_identity = conn.peer_identity.clone();
                            let rpc = delta_ssb::rpc::Connection::new(conn);
                            peers.register(peer_identity.clone(), rpc.clone());
                            if let Err(e) = rpc.serve(registry).await {
                                tracing::debug!(%peer, error = %e, "rpc session ended");
                            }
                            peers.deregister(&peer_identity);
                        }
                        Err(e) => tracing::debug!(%peer, error = %e, "handshake failed"),
                    }
                });
            }
        });
    }

    {
        let store = store.clone();
        let identity = identity_clone(&identity);
        let peers = peers.clone();
        let registry = registry.clone();
        tokio::spawn(delta_ssb::replication::dial_loop(
            store,
            identity,
            transport::DEFAULT_CAPS.to_vec(),
            peers,
            registry,
        ));
    }

    let rpc_listener = TcpListener::bind("127.0.0.1:9822").await?;
    tracing::info!("localhost json-rpc listening on 127.0.0.1:9822");
    delta_ssb::jsonrpc::serve(rpc_listener, store).await?;
    Ok(())
}
