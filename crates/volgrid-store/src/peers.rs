//! Typed peer accessors over the replicated store.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;
use volgrid_core::types::Peer;
use volgrid_core::{Error, ErrorCode, Result};

use crate::backend::{StoreBackend, PEER_PREFIX};

/// Peer accessor handle.
#[derive(Clone)]
pub struct Peers {
    store: Arc<dyn StoreBackend>,
}

impl Peers {
    /// Creates an accessor over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn StoreBackend>) -> Self {
        Self { store }
    }

    fn key(id: Uuid) -> String {
        format!("{PEER_PREFIX}{id}")
    }

    /// Whether a peer with this ID is a cluster member.
    pub async fn exists(&self, id: Uuid) -> Result<bool> {
        Ok(self.store.get(&Self::key(id)).await?.is_some())
    }

    /// Fetches a peer record.
    ///
    /// # Errors
    ///
    /// `NotFound` when the peer is not a cluster member.
    pub async fn get(&self, id: Uuid) -> Result<Peer> {
        let Some(bytes) = self.store.get(&Self::key(id)).await? else {
            return Err(Error::op_with_resource(
                ErrorCode::NotFound,
                format!("peer {id} not found in cluster"),
                id.to_string(),
            ));
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Lists all cluster members. Corrupt records are skipped with a log
    /// record.
    pub async fn list(&self) -> Result<Vec<Peer>> {
        let kvs = self.store.get_prefix(PEER_PREFIX).await?;
        let mut peers = Vec::with_capacity(kvs.len());
        for (key, value) in kvs {
            match serde_json::from_slice::<Peer>(&value) {
                Ok(peer) => peers.push(peer),
                Err(e) => warn!(key = %key, error = %e, "skipping corrupt peer record"),
            }
        }
        Ok(peers)
    }

    /// Writes a peer record.
    pub async fn upsert(&self, peer: &Peer) -> Result<()> {
        let bytes = serde_json::to_vec(peer)?;
        self.store.put(&Self::key(peer.id), bytes).await
    }

    /// Removes a peer record.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.store.delete(&Self::key(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemStore;

    fn peer(name: &str) -> Peer {
        Peer {
            id: Uuid::new_v4(),
            name: name.to_string(),
            addresses: vec![format!("{name}:24007")],
        }
    }

    #[tokio::test]
    async fn test_peer_round_trip() {
        let peers = Peers::new(Arc::new(MemStore::new()));
        let p = peer("node-1");

        assert!(!peers.exists(p.id).await.unwrap());
        peers.upsert(&p).await.unwrap();
        assert!(peers.exists(p.id).await.unwrap());
        assert_eq!(peers.get(p.id).await.unwrap(), p);

        peers.delete(p.id).await.unwrap();
        let err = peers.get(p.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_peer_list() {
        let peers = Peers::new(Arc::new(MemStore::new()));
        peers.upsert(&peer("node-1")).await.unwrap();
        peers.upsert(&peer("node-2")).await.unwrap();
        assert_eq!(peers.list().await.unwrap().len(), 2);
    }
}
