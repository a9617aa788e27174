//! Cluster-facing plumbing for volgrid: the persisted node identity,
//! the peer RPC adapter, and the seams to the data-plane daemons.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bricks;
pub mod heal;
pub mod identity;
pub mod rpc;

pub use bricks::{
    BrickRuntimeStatus, BrickSupervisor, NoOpBrickSupervisor, RecordingBrickSupervisor,
};
pub use heal::{
    parse_heal_info, CommandHealReporter, HealBrickEntry, HealReporter, StaticHealReporter,
};
pub use identity::load_or_create;
pub use rpc::{HttpDispatcher, PeerClient};
