//! Shared state wired into every handler.

use std::sync::Arc;

use uuid::Uuid;
use volgrid_cluster::{BrickSupervisor, HealReporter, PeerClient};
use volgrid_core::EventBus;
use volgrid_store::{Peers, StoreBackend, Volumes};
use volgrid_txn::{Registry, StepDispatcher, Txn, TxnOptions};

/// Everything the REST surface and the step handlers need.
pub struct Services {
    /// This node's identity.
    pub node_id: Uuid,
    /// The replicated store.
    pub store: Arc<dyn StoreBackend>,
    /// Volume accessors.
    pub volumes: Volumes,
    /// Peer accessors.
    pub peers: Peers,
    /// The step registry.
    pub registry: Arc<Registry>,
    /// Step dispatcher for peer nodes.
    pub dispatcher: Arc<dyn StepDispatcher>,
    /// Cluster event bus.
    pub events: EventBus,
    /// Data-plane daemon supervisor.
    pub supervisor: Arc<dyn BrickSupervisor>,
    /// Heal helper seam.
    pub heal: Arc<dyn HealReporter>,
    /// Client for the internal peer surface.
    pub peer_rpc: PeerClient,
    /// Engine tuning.
    pub txn_options: TxnOptions,
}

impl Services {
    /// Starts a fresh transaction against this daemon's cluster.
    #[must_use]
    pub fn txn(&self) -> Txn {
        Txn::new(
            Arc::clone(&self.store),
            self.peers.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.dispatcher),
            self.node_id,
            self.txn_options.clone(),
        )
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The daemon's services.
    pub services: Arc<Services>,
}
