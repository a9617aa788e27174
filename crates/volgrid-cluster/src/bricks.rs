//! Data-plane seam: the brick and self-heal daemon supervisor.
//!
//! The control plane only commands the data-plane daemons; how a brick
//! process is actually spawned is behind this trait.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use volgrid_core::types::{BrickInfo, VolumeInfo};
use volgrid_core::Result;

/// Runtime status of one brick process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrickRuntimeStatus {
    /// Whether the brick process is running.
    pub online: bool,
    /// Process ID, 0 when offline.
    pub pid: u32,
    /// Listening port, 0 when offline.
    pub port: u16,
}

impl BrickRuntimeStatus {
    /// Status of a brick with no running process.
    #[must_use]
    pub fn offline() -> Self {
        Self { online: false, pid: 0, port: 0 }
    }
}

/// Supervises the data-plane daemons on the local node.
#[async_trait]
pub trait BrickSupervisor: Send + Sync + 'static {
    /// Starts the brick process for `brick`.
    async fn start_brick(&self, brick: &BrickInfo, volume: &VolumeInfo) -> Result<()>;

    /// Stops the brick process for `brick`.
    async fn stop_brick(&self, brick: &BrickInfo) -> Result<()>;

    /// Reports the runtime status of `brick`.
    async fn brick_status(&self, brick: &BrickInfo) -> Result<BrickRuntimeStatus>;

    /// Starts the self-heal daemon on this node.
    async fn start_selfheal(&self) -> Result<()>;

    /// Stops the self-heal daemon on this node.
    async fn stop_selfheal(&self) -> Result<()>;
}

/// A supervisor that does nothing. Default for deployments where the
/// data plane is managed externally, and for tests.
#[derive(Debug, Clone, Default)]
pub struct NoOpBrickSupervisor;

#[async_trait]
impl BrickSupervisor for NoOpBrickSupervisor {
    async fn start_brick(&self, _brick: &BrickInfo, _volume: &VolumeInfo) -> Result<()> {
        Ok(())
    }

    async fn stop_brick(&self, _brick: &BrickInfo) -> Result<()> {
        Ok(())
    }

    async fn brick_status(&self, _brick: &BrickInfo) -> Result<BrickRuntimeStatus> {
        Ok(BrickRuntimeStatus::offline())
    }

    async fn start_selfheal(&self) -> Result<()> {
        Ok(())
    }

    async fn stop_selfheal(&self) -> Result<()> {
        Ok(())
    }
}

/// A supervisor that tracks which bricks were started. Test double.
#[derive(Debug, Default)]
pub struct RecordingBrickSupervisor {
    started: Mutex<HashSet<Uuid>>,
    selfheal_running: Mutex<bool>,
}

impl RecordingBrickSupervisor {
    /// Creates an empty recording supervisor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the brick with `id` is currently started.
    #[must_use]
    pub fn is_started(&self, id: Uuid) -> bool {
        self.started.lock().expect("lock poisoned").contains(&id)
    }

    /// Whether the self-heal daemon is currently running.
    #[must_use]
    pub fn selfheal_running(&self) -> bool {
        *self.selfheal_running.lock().expect("lock poisoned")
    }
}

#[async_trait]
impl BrickSupervisor for RecordingBrickSupervisor {
    async fn start_brick(&self, brick: &BrickInfo, _volume: &VolumeInfo) -> Result<()> {
        self.started.lock().expect("lock poisoned").insert(brick.id);
        Ok(())
    }

    async fn stop_brick(&self, brick: &BrickInfo) -> Result<()> {
        self.started.lock().expect("lock poisoned").remove(&brick.id);
        Ok(())
    }

    async fn brick_status(&self, brick: &BrickInfo) -> Result<BrickRuntimeStatus> {
        if self.is_started(brick.id) {
            Ok(BrickRuntimeStatus { online: true, pid: 1000, port: 49152 })
        } else {
            Ok(BrickRuntimeStatus::offline())
        }
    }

    async fn start_selfheal(&self) -> Result<()> {
        *self.selfheal_running.lock().expect("lock poisoned") = true;
        Ok(())
    }

    async fn stop_selfheal(&self) -> Result<()> {
        *self.selfheal_running.lock().expect("lock poisoned") = false;
        Ok(())
    }
}
