//! Typed volume accessors over the replicated store.
//!
//! Everything outside the transaction engine reads volumes through these
//! accessors; only transaction steps call the mutating ones.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;
use volgrid_core::types::{VolState, VolumeInfo};
use volgrid_core::{Error, ErrorCode, Result};

use crate::backend::{StoreBackend, VOLUME_PREFIX};

/// Volume accessor handle.
#[derive(Clone)]
pub struct Volumes {
    store: Arc<dyn StoreBackend>,
}

impl Volumes {
    /// Creates an accessor over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn StoreBackend>) -> Self {
        Self { store }
    }

    fn key(name: &str) -> String {
        format!("{VOLUME_PREFIX}{name}")
    }

    /// Whether a volume with this name exists.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.store.get(&Self::key(name)).await?.is_some())
    }

    /// Fetches a volume by name.
    ///
    /// # Errors
    ///
    /// `NotFound` when no such volume exists.
    pub async fn get(&self, name: &str) -> Result<VolumeInfo> {
        let Some(bytes) = self.store.get(&Self::key(name)).await? else {
            return Err(Error::op_with_resource(
                ErrorCode::NotFound,
                format!("volume {name} not found"),
                name,
            ));
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Lists all volumes.
    ///
    /// Corrupt records are skipped with a log record; they never fail the
    /// caller.
    pub async fn list(&self) -> Result<Vec<VolumeInfo>> {
        let kvs = self.store.get_prefix(VOLUME_PREFIX).await?;
        let mut volumes = Vec::with_capacity(kvs.len());
        for (key, value) in kvs {
            match serde_json::from_slice::<VolumeInfo>(&value) {
                Ok(volume) => volumes.push(volume),
                Err(e) => warn!(key = %key, error = %e, "skipping corrupt volume record"),
            }
        }
        Ok(volumes)
    }

    /// Writes a volume record, overwriting any previous revision.
    pub async fn upsert(&self, volume: &VolumeInfo) -> Result<()> {
        let bytes = serde_json::to_vec(volume)?;
        self.store.put(&Self::key(&volume.name), bytes).await
    }

    /// Removes a volume record.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.store.delete(&Self::key(name)).await
    }

    /// Whether any started volume still depends on the self-heal daemon,
    /// i.e. has a replicate or disperse layout.
    pub async fn replicate_volumes_quiesced(&self) -> Result<bool> {
        let volumes = self.list().await?;
        Ok(!volumes
            .iter()
            .any(|v| v.ty.is_heal_capable() && v.state == VolState::Started))
    }

    /// Returns the name of the live volume using `(node, path)` as a
    /// brick, if any. `exclude` skips the volume being re-validated.
    pub async fn brick_path_owner(
        &self,
        node: Uuid,
        path: &str,
        exclude: Option<&str>,
    ) -> Result<Option<String>> {
        for volume in self.list().await? {
            if Some(volume.name.as_str()) == exclude {
                continue;
            }
            if volume.bricks().any(|b| b.node_id == node && b.path == path) {
                return Ok(Some(volume.name));
            }
        }
        Ok(None)
    }

    /// Whether any live volume has a brick on `node`.
    pub async fn bricks_exist_on(&self, node: Uuid) -> Result<bool> {
        for volume in self.list().await? {
            if volume.bricks().any(|b| b.node_id == node) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
