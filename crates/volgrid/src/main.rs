//! volgrid: distributed storage management daemon.
//!
//! Wires the replicated store, the transaction framework and the REST
//! surface together and serves until shut down.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use volgrid_api::{create_router, register_steps, AppState, Services, StepDeps};
use volgrid_cluster::{
    CommandHealReporter, HttpDispatcher, NoOpBrickSupervisor, PeerClient,
};
use volgrid_core::config::{Config, LogFormat, StoreBackendKind};
use volgrid_core::types::Peer;
use volgrid_core::{ClusterEvent, EventBus};
use volgrid_store::{EtcdStore, MemStore, Peers, StoreBackend, Volumes, WatchEvent, PEER_PREFIX};
use volgrid_txn::Registry;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => run_daemon(args).await,
        Commands::Version => {
            println!("volgridd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run_daemon(args: cli::ServeArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(workdir) = args.workdir {
        config.daemon.workdir = workdir;
    }
    if !args.store_endpoints.is_empty() {
        config.store.endpoints = args.store_endpoints;
    }

    init_logging(&config)?;

    let node_id = volgrid_cluster::load_or_create(&config.daemon.workdir)
        .context("failed to establish node identity")?;
    info!(node_id = %node_id, "starting volgridd");

    let store: Arc<dyn StoreBackend> = match config.store.backend {
        StoreBackendKind::Etcd => Arc::new(
            EtcdStore::new(&config.store).await.context("failed to connect to the store")?,
        ),
        StoreBackendKind::Memory => {
            info!("running against the in-memory store; single-node development mode");
            Arc::new(MemStore::new())
        }
    };

    let volumes = Volumes::new(Arc::clone(&store));
    let peers = Peers::new(Arc::clone(&store));
    let registry = Arc::new(Registry::new());
    let supervisor = Arc::new(NoOpBrickSupervisor);
    let heal = Arc::new(CommandHealReporter::new(config.daemon.heal_helper.clone()));

    register_steps(
        &registry,
        &StepDeps {
            node_id,
            store: Arc::clone(&store),
            volumes: volumes.clone(),
            supervisor: supervisor.clone(),
            heal: heal.clone(),
        },
    );
    registry.freeze();

    let events = EventBus::default();
    let dispatcher =
        Arc::new(HttpDispatcher::new(node_id, Arc::clone(&registry), peers.clone()));

    // Mirror membership changes, including those committed by other
    // daemons, onto the local event bus.
    let mut peer_watch = store.watch(PEER_PREFIX).await.context("failed to watch peers")?;
    let bus = events.clone();
    tokio::spawn(async move {
        while let Some(event) = peer_watch.recv().await {
            if let WatchEvent::Put { key, value } = event {
                match serde_json::from_slice::<Peer>(&value) {
                    Ok(peer) => bus.publish(ClusterEvent::PeerJoined { peer }),
                    Err(e) => tracing::warn!(key = %key, error = %e, "ignoring corrupt peer record"),
                }
            }
        }
    });

    // Publish this node's membership record on first boot.
    if !peers.exists(node_id).await.context("failed to read peer record")? {
        let name = config
            .daemon
            .name
            .clone()
            .unwrap_or_else(|| format!("node-{}", &node_id.to_string()[..8]));
        let addresses = if config.daemon.peer_addresses.is_empty() {
            vec![config.server.bind.to_string()]
        } else {
            config.daemon.peer_addresses.clone()
        };
        let peer = Peer { id: node_id, name, addresses };
        peers.upsert(&peer).await.context("failed to register peer record")?;
        info!(node_id = %node_id, "registered this node in the cluster");
    }

    let services = Arc::new(Services {
        node_id,
        store,
        volumes,
        peers,
        registry,
        dispatcher,
        events,
        supervisor,
        heal,
        peer_rpc: PeerClient::new(),
        txn_options: (&config.txn).into(),
    });

    let app = create_router(AppState { services });

    let listener = TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    info!(addr = %config.server.bind, "REST server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("daemon shutdown complete");
    Ok(())
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    match path {
        Some(p) => {
            Config::from_file(p).with_context(|| format!("failed to load {}", p.display()))
        }
        None => {
            let default_paths =
                [PathBuf::from("volgrid.toml"), PathBuf::from("/etc/volgrid/volgrid.toml")];
            for p in &default_paths {
                if p.exists() {
                    return Config::from_file(p)
                        .with_context(|| format!("failed to load {}", p.display()));
                }
            }
            Ok(Config::default())
        }
    }
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry().with(filter).with(fmt_layer.json()).init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}
