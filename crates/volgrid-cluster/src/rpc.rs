//! Peer RPC adapter.
//!
//! Ships step requests and context snapshots to participant nodes over
//! the internal HTTP surface, and returns their results. The receiving
//! side lives in the API crate's internal routes.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;
use uuid::Uuid;
use volgrid_core::{Error, Result};
use volgrid_store::Peers;
use volgrid_txn::{execute_local, Registry, StepDispatcher, StepRequest, StepResponse};

/// HTTP client for the internal peer surface.
#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
}

impl PeerClient {
    /// Creates a client with a shared connection pool.
    #[must_use]
    pub fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }

    /// Runs a transaction step on the peer at `address`.
    pub async fn run_step(&self, address: &str, request: &StepRequest) -> Result<StepResponse> {
        let url = format!("http://{address}/internal/txn/step");
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::unavailable(format!("step dispatch to {address} failed: {e}")))?;

        if response.status() != StatusCode::OK {
            return Err(Error::unavailable(format!(
                "peer {address} rejected step dispatch: {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::internal(format!("malformed step response from {address}: {e}")))
    }

    /// Asks the peer at `address` to leave the cluster.
    pub async fn leave_cluster(&self, address: &str) -> Result<()> {
        let url = format!("http://{address}/internal/cluster/leave");
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| Error::unavailable(format!("leave request to {address} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::unavailable(format!(
                "peer {address} rejected leave request: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl Default for PeerClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatcher routing steps to their target node: in-process for the
/// local node, over the peer RPC adapter for everyone else.
pub struct HttpDispatcher {
    local_node: Uuid,
    registry: Arc<Registry>,
    peers: Peers,
    client: PeerClient,
}

impl HttpDispatcher {
    /// Creates a dispatcher for `local_node`.
    #[must_use]
    pub fn new(local_node: Uuid, registry: Arc<Registry>, peers: Peers) -> Self {
        Self { local_node, registry, peers, client: PeerClient::new() }
    }
}

#[async_trait]
impl StepDispatcher for HttpDispatcher {
    async fn run_step(&self, node: Uuid, request: StepRequest) -> Result<StepResponse> {
        if node == self.local_node {
            return Ok(execute_local(&self.registry, &request).await);
        }

        let peer = self.peers.get(node).await?;
        let address = peer
            .addresses
            .first()
            .ok_or_else(|| Error::internal(format!("peer {node} has no addresses")))?;
        debug!(step = %request.step_name, peer = %node, address = %address,
            "dispatching step to peer");
        self.client.run_step(address, &request).await
    }
}
