//! REST request and response shapes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use volgrid_cluster::{BrickRuntimeStatus, HealBrickEntry};
use volgrid_core::types::{BrickInfo, BrickType, Peer, Subvol, SubvolType, VolState, VolType, VolumeInfo};

/// One requested brick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrickReq {
    /// `"arbiter"` for an arbiter brick; anything else is a data brick.
    #[serde(rename = "type", default)]
    pub ty: Option<String>,
    /// Node the brick should live on.
    pub nodeid: Uuid,
    /// Absolute brick directory path on that node.
    pub path: String,
}

/// One requested sub-volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubvolReq {
    /// Sub-volume name; defaults to `s-<index>`.
    #[serde(default)]
    pub name: Option<String>,
    /// `"distribute"`, `"replicate"` or `"disperse"`.
    #[serde(rename = "type")]
    pub ty: String,
    /// Member bricks.
    #[serde(default)]
    pub bricks: Vec<BrickReq>,
    /// Replica count, required for replicate sub-volumes.
    #[serde(rename = "replica", default)]
    pub replica_count: Option<u32>,
    /// Arbiter count, 0 or 1.
    #[serde(rename = "arbiter", default)]
    pub arbiter_count: Option<u32>,
}

/// Volume create request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolCreateReq {
    /// Volume name.
    #[serde(default)]
    pub name: String,
    /// Transport protocol; defaults to `tcp`.
    #[serde(default)]
    pub transport: Option<String>,
    /// Requested sub-volumes.
    #[serde(default)]
    pub subvols: Vec<SubvolReq>,
    /// Volume options.
    #[serde(default)]
    pub options: HashMap<String, String>,
    /// Relax local brick-directory checks.
    #[serde(default)]
    pub force: bool,
}

/// Volume expand request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolExpandReq {
    /// Replica count; when set, must match the volume's existing count.
    #[serde(rename = "replica", default)]
    pub replica_count: Option<u32>,
    /// Bricks to add.
    #[serde(default)]
    pub bricks: Vec<BrickReq>,
}

/// Static information about a brick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrickResp {
    /// Brick identifier.
    pub id: Uuid,
    /// Brick directory path.
    pub path: String,
    /// Owning volume ID.
    #[serde(rename = "volume-id")]
    pub volume_id: Uuid,
    /// Owning volume name.
    #[serde(rename = "volume-name")]
    pub volume_name: String,
    /// Hosting node ID.
    #[serde(rename = "node-id")]
    pub node_id: Uuid,
    /// Hosting node address.
    pub host: String,
    /// Data brick or arbiter.
    #[serde(rename = "type")]
    pub ty: BrickType,
}

impl From<&BrickInfo> for BrickResp {
    fn from(brick: &BrickInfo) -> Self {
        Self {
            id: brick.id,
            path: brick.path.clone(),
            volume_id: brick.volume_id,
            volume_name: brick.volume_name.clone(),
            node_id: brick.node_id,
            host: brick.hostname.clone(),
            ty: brick.ty,
        }
    }
}

/// Static information about a sub-volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubvolResp {
    /// Sub-volume name.
    pub name: String,
    /// Sub-volume type.
    #[serde(rename = "type")]
    pub ty: SubvolType,
    /// Member bricks.
    pub bricks: Vec<BrickResp>,
    /// Replica count.
    #[serde(rename = "replica-count")]
    pub replica_count: u32,
    /// Arbiter count.
    #[serde(rename = "arbiter-count")]
    pub arbiter_count: u32,
}

impl From<&Subvol> for SubvolResp {
    fn from(subvol: &Subvol) -> Self {
        Self {
            name: subvol.name.clone(),
            ty: subvol.ty,
            bricks: subvol.bricks.iter().map(BrickResp::from).collect(),
            replica_count: subvol.replica_count,
            arbiter_count: subvol.arbiter_count,
        }
    }
}

/// Static information about a volume. Internal credentials are never
/// part of the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeResp {
    /// Volume ID.
    pub id: Uuid,
    /// Volume name.
    pub name: String,
    /// Volume type.
    #[serde(rename = "type")]
    pub ty: VolType,
    /// Transport protocol.
    pub transport: String,
    /// Distribute count.
    #[serde(rename = "distribute-count")]
    pub dist_count: u32,
    /// Replica count of the sub-volumes.
    #[serde(rename = "replica-count")]
    pub replica_count: u32,
    /// Arbiter count of the sub-volumes.
    #[serde(rename = "arbiter-count")]
    pub arbiter_count: u32,
    /// Volume options.
    pub options: HashMap<String, String>,
    /// Volume state.
    pub state: VolState,
    /// Committed revision.
    pub version: u64,
    /// Sub-volumes.
    pub subvols: Vec<SubvolResp>,
}

impl From<&VolumeInfo> for VolumeResp {
    fn from(volume: &VolumeInfo) -> Self {
        Self {
            id: volume.id,
            name: volume.name.clone(),
            ty: volume.ty,
            transport: volume.transport.clone(),
            dist_count: volume.dist_count,
            replica_count: volume.subvols.first().map_or(1, |s| s.replica_count),
            arbiter_count: volume.subvols.first().map_or(0, |s| s.arbiter_count),
            options: volume.options.clone(),
            state: volume.state,
            version: volume.version,
            subvols: volume.subvols.iter().map(SubvolResp::from).collect(),
        }
    }
}

/// Runtime information about one brick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrickStatusResp {
    /// Static brick information.
    pub info: BrickResp,
    /// Whether the brick process is running.
    pub online: bool,
    /// Brick process ID.
    pub pid: u32,
    /// Brick listening port.
    pub port: u16,
}

impl BrickStatusResp {
    /// Combines static brick info with its runtime status.
    #[must_use]
    pub fn new(brick: &BrickInfo, status: &BrickRuntimeStatus) -> Self {
        Self {
            info: BrickResp::from(brick),
            online: status.online,
            pid: status.pid,
            port: status.port,
        }
    }
}

/// Per-brick runtime statuses of a volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeStatusResp {
    /// One entry per brick.
    pub bricks: Vec<BrickStatusResp>,
}

/// A cluster member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerResp {
    /// Peer ID.
    pub id: Uuid,
    /// Peer name.
    pub name: String,
    /// Peer addresses.
    pub addresses: Vec<String>,
}

impl From<&Peer> for PeerResp {
    fn from(peer: &Peer) -> Self {
        Self { id: peer.id, name: peer.name.clone(), addresses: peer.addresses.clone() }
    }
}

/// Heal-info response: per-brick heal counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealInfoResp {
    /// One entry per brick.
    pub bricks: Vec<HealBrickEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_req_field_names() {
        let req: VolCreateReq = serde_json::from_str(
            r#"{
                "name": "testvol",
                "subvols": [{
                    "type": "replicate",
                    "replica": 2,
                    "bricks": [
                        {"nodeid": "4a5f0a0c-96c4-4c18-a412-a41412f6ab3d", "path": "/export/b0"},
                        {"nodeid": "4a5f0a0c-96c4-4c18-a412-a41412f6ab3d", "path": "/export/b1",
                         "type": "arbiter"}
                    ]
                }],
                "options": {"afr.eager-lock": "on"},
                "force": true
            }"#,
        )
        .unwrap();

        assert_eq!(req.name, "testvol");
        assert_eq!(req.subvols.len(), 1);
        assert_eq!(req.subvols[0].replica_count, Some(2));
        assert_eq!(req.subvols[0].bricks[1].ty.as_deref(), Some("arbiter"));
        assert!(req.force);
    }

    #[test]
    fn test_create_req_defaults() {
        let req: VolCreateReq = serde_json::from_str(r#"{"name": "v"}"#).unwrap();
        assert!(req.subvols.is_empty());
        assert!(req.options.is_empty());
        assert!(!req.force);
        assert!(req.transport.is_none());

        let req: VolCreateReq = serde_json::from_str("{}").unwrap();
        assert!(req.name.is_empty());
    }

    #[test]
    fn test_volume_resp_hides_auth() {
        let json = serde_json::to_string(&VolumeResp {
            id: Uuid::new_v4(),
            name: "v".to_string(),
            ty: VolType::Replicate,
            transport: "tcp".to_string(),
            dist_count: 1,
            replica_count: 2,
            arbiter_count: 0,
            options: HashMap::new(),
            state: VolState::Created,
            version: 1,
            subvols: Vec::new(),
        })
        .unwrap();

        assert!(json.contains("\"replica-count\":2"));
        assert!(json.contains("\"distribute-count\":1"));
        assert!(!json.contains("auth"));
        assert!(!json.contains("password"));
    }
}
