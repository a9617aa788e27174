//! Cluster metadata model: peers, volumes, sub-volumes and bricks.
//!
//! The replicated store is the single authoritative owner of these records.
//! In-memory copies held during a transaction are private, short-lived
//! snapshots; only the store-volume step commits them.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A cluster member.
///
/// Exactly one record per member lives in the store under `peers/<id>`.
/// A peer record may not be deleted while any brick references its ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Stable node identifier, established at the peer's first boot.
    pub id: Uuid,
    /// Human-readable peer name (usually the hostname).
    pub name: String,
    /// Ordered list of `host:port` addresses the peer is reachable at.
    pub addresses: Vec<String>,
}

/// The current state of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolState {
    /// The volume has been created but never started.
    Created,
    /// The volume is running.
    Started,
    /// The volume has been stopped after running.
    Stopped,
}

impl VolState {
    /// Whether the transition `self -> to` is allowed.
    ///
    /// Allowed: Created->Started, Started->Stopped, Stopped->Started.
    #[must_use]
    pub fn can_transition(self, to: VolState) -> bool {
        matches!(
            (self, to),
            (Self::Created, Self::Started)
                | (Self::Started, Self::Stopped)
                | (Self::Stopped, Self::Started)
        )
    }

    /// Whether a volume in this state may be deleted.
    #[must_use]
    pub fn deletable(self) -> bool {
        matches!(self, Self::Created | Self::Stopped)
    }
}

impl std::fmt::Display for VolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "Created",
            Self::Started => "Started",
            Self::Stopped => "Stopped",
        };
        write!(f, "{s}")
    }
}

/// The redundancy layout of a volume, derived from its sub-volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolType {
    /// Plain distribute.
    Distribute,
    /// Single replicate set.
    Replicate,
    /// Single disperse set.
    Disperse,
    /// Distribute over replicate sets.
    DistReplicate,
    /// Distribute over disperse sets.
    DistDisperse,
}

impl VolType {
    /// Derives the volume type from the sub-volume composition.
    ///
    /// `Replicate` for a single replicate sub-volume, `DistReplicate` for
    /// two or more; analogously for disperse; anything else is
    /// `Distribute`.
    #[must_use]
    pub fn from_subvols(subvols: &[Subvol]) -> Self {
        if !subvols.is_empty() && subvols.iter().all(|s| s.ty == SubvolType::Replicate) {
            if subvols.len() == 1 {
                Self::Replicate
            } else {
                Self::DistReplicate
            }
        } else if !subvols.is_empty() && subvols.iter().all(|s| s.ty == SubvolType::Disperse) {
            if subvols.len() == 1 {
                Self::Disperse
            } else {
                Self::DistDisperse
            }
        } else {
            Self::Distribute
        }
    }

    /// Whether this type carries redundancy handled by the self-heal daemon.
    #[must_use]
    pub fn is_heal_capable(self) -> bool {
        matches!(self, Self::Replicate | Self::Disperse | Self::DistReplicate | Self::DistDisperse)
    }
}

impl std::fmt::Display for VolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Distribute => "Distribute",
            Self::Replicate => "Replicate",
            Self::Disperse => "Disperse",
            Self::DistReplicate => "DistReplicate",
            Self::DistDisperse => "DistDisperse",
        };
        write!(f, "{s}")
    }
}

/// The type of a sub-volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubvolType {
    /// A single distribute slot.
    Distribute,
    /// A replicate set.
    Replicate,
    /// An erasure-coded set.
    Disperse,
}

/// The role of a brick within its sub-volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrickType {
    /// A data brick.
    Brick,
    /// An arbiter brick (metadata-only quorum member).
    Arbiter,
}

/// One backing store directory on one node; the unit of placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickInfo {
    /// Unique brick identifier.
    pub id: Uuid,
    /// The node this brick lives on. Must reference a known peer.
    pub node_id: Uuid,
    /// Host part of the owning peer's first address.
    pub hostname: String,
    /// Absolute path of the brick directory on its node.
    pub path: String,
    /// Data brick or arbiter.
    pub ty: BrickType,
    /// The volume this brick belongs to.
    pub volume_id: Uuid,
    /// Name of the volume this brick belongs to.
    pub volume_name: String,
}

/// A group of bricks forming one redundancy unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subvol {
    /// Sub-volume name; defaults to `s-<index>`.
    pub name: String,
    /// Redundancy type of this sub-volume.
    pub ty: SubvolType,
    /// Ordered list of member bricks.
    pub bricks: Vec<BrickInfo>,
    /// Replica count; 1 for distribute sub-volumes.
    pub replica_count: u32,
    /// Arbiter count, 0 or 1. When 1, the brick at index 2 is the arbiter.
    pub arbiter_count: u32,
}

impl Subvol {
    /// Checks the structural invariants of this sub-volume.
    pub fn validate(&self) -> Result<()> {
        if self.bricks.is_empty() {
            return Err(Error::invalid_argument(format!(
                "subvolume {} has no bricks",
                self.name
            )));
        }
        match self.ty {
            SubvolType::Replicate => {
                if self.replica_count == 0 {
                    return Err(Error::invalid_argument(format!(
                        "subvolume {} has replica count 0",
                        self.name
                    )));
                }
                if self.replica_count as usize != self.bricks.len() {
                    return Err(Error::invalid_argument(format!(
                        "subvolume {}: replica count {} does not match brick count {}",
                        self.name,
                        self.replica_count,
                        self.bricks.len()
                    )));
                }
            }
            SubvolType::Distribute => {
                if self.replica_count != 1 {
                    return Err(Error::invalid_argument(format!(
                        "distribute subvolume {} must have replica count 1",
                        self.name
                    )));
                }
            }
            SubvolType::Disperse => {}
        }
        match self.arbiter_count {
            0 => {}
            1 => {
                if self.ty != SubvolType::Replicate || self.replica_count != 3 {
                    return Err(Error::invalid_argument(
                        "arbiter configuration requires a replica-3 subvolume; \
                         the third brick of the replica is the arbiter",
                    ));
                }
                if self.bricks.get(2).map(|b| b.ty) != Some(BrickType::Arbiter) {
                    return Err(Error::invalid_argument(format!(
                        "subvolume {}: the third brick must be the arbiter",
                        self.name
                    )));
                }
            }
            n => {
                return Err(Error::invalid_argument(format!("invalid arbiter count {n}")));
            }
        }
        Ok(())
    }
}

/// Credentials used by trusted internal clients of a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolAuth {
    /// Generated username.
    pub username: String,
    /// Generated password.
    pub password: String,
}

impl VolAuth {
    /// Generates a fresh credential pair.
    #[must_use]
    pub fn generate() -> Self {
        Self { username: Uuid::new_v4().to_string(), password: Uuid::new_v4().to_string() }
    }
}

/// A user-visible file-system namespace composed of sub-volumes.
///
/// The central aggregate of the metadata model, persisted at
/// `volumes/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Immutable volume identifier, generated at creation.
    pub id: Uuid,
    /// Cluster-unique volume name; the primary key.
    pub name: String,
    /// Redundancy layout, derived from the sub-volumes.
    pub ty: VolType,
    /// Transport protocol; defaults to `tcp`.
    pub transport: String,
    /// Current volume state.
    pub state: VolState,
    /// Number of distribute slots; equals the sub-volume count.
    pub dist_count: u32,
    /// Ordered, non-empty list of sub-volumes.
    pub subvols: Vec<Subvol>,
    /// Volume options, keyed by dotted option name.
    pub options: HashMap<String, String>,
    /// Internal client credentials.
    pub auth: VolAuth,
    /// Monotonic revision, bumped on every persisted mutation.
    pub version: u64,
    /// Checksum of the serialized volume at the last commit.
    pub checksum: u64,
    /// Whether the self-heal service is enabled for this volume.
    pub heal_flag: bool,
    /// Whether granular entry heal is enabled for this volume.
    pub granular_heal_entry: bool,
}

impl VolumeInfo {
    /// Returns the deduplicated list of nodes hosting bricks of this volume.
    #[must_use]
    pub fn nodes(&self) -> Vec<Uuid> {
        let mut nodes = Vec::new();
        for subvol in &self.subvols {
            for brick in &subvol.bricks {
                if !nodes.contains(&brick.node_id) {
                    nodes.push(brick.node_id);
                }
            }
        }
        nodes
    }

    /// Returns an iterator over all bricks of all sub-volumes.
    pub fn bricks(&self) -> impl Iterator<Item = &BrickInfo> {
        self.subvols.iter().flat_map(|s| s.bricks.iter())
    }

    /// Returns a flat string-map view of the volume, used in logs and
    /// handed to data-plane helpers.
    #[must_use]
    pub fn string_map(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("volume.id".to_string(), self.id.to_string());
        m.insert("volume.name".to_string(), self.name.clone());
        m.insert("volume.type".to_string(), self.ty.to_string());
        m.insert("volume.transport".to_string(), self.transport.clone());
        m.insert("volume.auth.username".to_string(), self.auth.username.clone());
        m.insert("volume.auth.password".to_string(), self.auth.password.clone());
        m
    }

    /// Checks the structural invariants of the volume.
    ///
    /// Peer existence and cluster-wide brick-path uniqueness are checked
    /// against the store by the validation step; everything local to the
    /// record is checked here.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid_argument("volume name is empty"));
        }
        if self.subvols.is_empty() {
            return Err(Error::invalid_argument("volume has no subvolumes"));
        }
        if self.dist_count as usize != self.subvols.len() {
            return Err(Error::invalid_argument(format!(
                "distribute count {} does not match subvolume count {}",
                self.dist_count,
                self.subvols.len()
            )));
        }
        if self.ty != VolType::from_subvols(&self.subvols) {
            return Err(Error::invalid_argument(format!(
                "volume type {} does not match subvolume composition",
                self.ty
            )));
        }
        for subvol in &self.subvols {
            subvol.validate()?;
            for brick in &subvol.bricks {
                if !Path::new(&brick.path).is_absolute() {
                    return Err(Error::invalid_argument(format!(
                        "brick path {} is not absolute",
                        brick.path
                    )));
                }
            }
        }
        // Brick (node, path) pairs must be unique within the volume; the
        // cross-volume check runs against the store.
        let mut seen = std::collections::HashSet::new();
        for brick in self.bricks() {
            if !seen.insert((brick.node_id, brick.path.as_str())) {
                return Err(Error::invalid_argument(format!(
                    "duplicate brick {}:{}",
                    brick.node_id, brick.path
                )));
            }
        }
        Ok(())
    }

    /// Bumps the revision ahead of a commit and recomputes the checksum.
    pub fn bump_version(&mut self) -> Result<()> {
        self.version += 1;
        self.checksum = 0;
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        bytes.hash(&mut hasher);
        self.checksum = hasher.finish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brick(node: Uuid, path: &str, ty: BrickType) -> BrickInfo {
        BrickInfo {
            id: Uuid::new_v4(),
            node_id: node,
            hostname: "host-1".to_string(),
            path: path.to_string(),
            ty,
            volume_id: Uuid::new_v4(),
            volume_name: "testvol".to_string(),
        }
    }

    fn replicate_subvol(name: &str, node: Uuid, replica: u32) -> Subvol {
        let bricks =
            (0..replica).map(|i| brick(node, &format!("/export/{name}/b{i}"), BrickType::Brick));
        Subvol {
            name: name.to_string(),
            ty: SubvolType::Replicate,
            bricks: bricks.collect(),
            replica_count: replica,
            arbiter_count: 0,
        }
    }

    fn volume(subvols: Vec<Subvol>) -> VolumeInfo {
        VolumeInfo {
            id: Uuid::new_v4(),
            name: "testvol".to_string(),
            ty: VolType::from_subvols(&subvols),
            transport: "tcp".to_string(),
            state: VolState::Created,
            dist_count: subvols.len() as u32,
            subvols,
            options: HashMap::new(),
            auth: VolAuth::generate(),
            version: 0,
            checksum: 0,
            heal_flag: false,
            granular_heal_entry: false,
        }
    }

    #[test]
    fn test_state_transitions() {
        assert!(VolState::Created.can_transition(VolState::Started));
        assert!(VolState::Started.can_transition(VolState::Stopped));
        assert!(VolState::Stopped.can_transition(VolState::Started));
        assert!(!VolState::Started.can_transition(VolState::Started));
        assert!(!VolState::Created.can_transition(VolState::Stopped));
        assert!(VolState::Created.deletable());
        assert!(VolState::Stopped.deletable());
        assert!(!VolState::Started.deletable());
    }

    #[test]
    fn test_type_derivation() {
        let node = Uuid::new_v4();
        assert_eq!(
            VolType::from_subvols(&[replicate_subvol("s-0", node, 2)]),
            VolType::Replicate
        );
        assert_eq!(
            VolType::from_subvols(&[
                replicate_subvol("s-0", node, 2),
                replicate_subvol("s-1", node, 2)
            ]),
            VolType::DistReplicate
        );

        let distribute = Subvol {
            name: "s-0".to_string(),
            ty: SubvolType::Distribute,
            bricks: vec![brick(node, "/export/d0", BrickType::Brick)],
            replica_count: 1,
            arbiter_count: 0,
        };
        assert_eq!(VolType::from_subvols(std::slice::from_ref(&distribute)), VolType::Distribute);

        // Mixed composition degrades to Distribute.
        assert_eq!(
            VolType::from_subvols(&[distribute, replicate_subvol("s-1", node, 2)]),
            VolType::Distribute
        );
    }

    #[test]
    fn test_heal_capable_types() {
        assert!(VolType::Replicate.is_heal_capable());
        assert!(VolType::DistDisperse.is_heal_capable());
        assert!(!VolType::Distribute.is_heal_capable());
    }

    #[test]
    fn test_subvol_replica_count_mismatch() {
        let node = Uuid::new_v4();
        let mut subvol = replicate_subvol("s-0", node, 2);
        subvol.replica_count = 3;
        assert!(subvol.validate().is_err());
    }

    #[test]
    fn test_subvol_replica_count_zero() {
        let node = Uuid::new_v4();
        let mut subvol = replicate_subvol("s-0", node, 2);
        subvol.replica_count = 0;
        assert!(subvol.validate().is_err());
    }

    #[test]
    fn test_arbiter_requires_replica_three() {
        let node = Uuid::new_v4();
        let mut subvol = replicate_subvol("s-0", node, 2);
        subvol.arbiter_count = 1;
        assert!(subvol.validate().is_err());

        let mut subvol = replicate_subvol("s-0", node, 3);
        subvol.arbiter_count = 1;
        // Third brick is not an arbiter yet.
        assert!(subvol.validate().is_err());

        subvol.bricks[2].ty = BrickType::Arbiter;
        assert!(subvol.validate().is_ok());
    }

    #[test]
    fn test_volume_invariants() {
        let node = Uuid::new_v4();
        let vol = volume(vec![replicate_subvol("s-0", node, 2), replicate_subvol("s-1", node, 2)]);
        assert!(vol.validate().is_ok());
        assert_eq!(vol.ty, VolType::DistReplicate);
        assert_eq!(vol.dist_count, 2);
        assert_eq!(vol.nodes(), vec![node]);
    }

    #[test]
    fn test_volume_rejects_relative_brick_path() {
        let node = Uuid::new_v4();
        let mut vol = volume(vec![replicate_subvol("s-0", node, 2)]);
        vol.subvols[0].bricks[0].path = "export/b0".to_string();
        assert!(vol.validate().is_err());
    }

    #[test]
    fn test_volume_rejects_duplicate_brick() {
        let node = Uuid::new_v4();
        let mut vol = volume(vec![replicate_subvol("s-0", node, 2)]);
        let duplicate = vol.subvols[0].bricks[0].path.clone();
        vol.subvols[0].bricks[1].path = duplicate;
        assert!(vol.validate().is_err());
    }

    #[test]
    fn test_volume_rejects_stale_type() {
        let node = Uuid::new_v4();
        let mut vol = volume(vec![replicate_subvol("s-0", node, 2)]);
        vol.ty = VolType::Distribute;
        assert!(vol.validate().is_err());
    }

    #[test]
    fn test_bump_version_monotonic() {
        let node = Uuid::new_v4();
        let mut vol = volume(vec![replicate_subvol("s-0", node, 2)]);
        vol.bump_version().unwrap();
        let first = (vol.version, vol.checksum);
        vol.bump_version().unwrap();
        assert_eq!(vol.version, first.0 + 1);
        assert_ne!(vol.checksum, first.1);
    }

    #[test]
    fn test_string_map_view() {
        let node = Uuid::new_v4();
        let vol = volume(vec![replicate_subvol("s-0", node, 2)]);
        let m = vol.string_map();
        assert_eq!(m["volume.name"], "testvol");
        assert_eq!(m["volume.type"], "Replicate");
        assert_eq!(m["volume.id"], vol.id.to_string());
    }

    #[test]
    fn test_volume_serde_round_trip() {
        let node = Uuid::new_v4();
        let vol = volume(vec![replicate_subvol("s-0", node, 2)]);
        let json = serde_json::to_vec(&vol).unwrap();
        let back: VolumeInfo = serde_json::from_slice(&json).unwrap();
        assert_eq!(vol, back);
    }
}
