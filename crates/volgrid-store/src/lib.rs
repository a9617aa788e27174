//! Replicated store abstraction for volgrid.
//!
//! The store is a strongly consistent key-value abstraction with leased
//! locks, prefix scans and watches. Two backends implement it: an etcd
//! client for clusters and a process-local one for tests and single-node
//! development. Typed accessors for the cluster metadata (volumes, peers)
//! live on top.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod etcd;
pub mod memory;
pub mod peers;
pub mod volumes;

pub use backend::{LockHandle, StoreBackend, WatchEvent};
pub use backend::{LOCK_PREFIX, PEER_PREFIX, TXN_PREFIX, VOLUME_PREFIX};
pub use etcd::EtcdStore;
pub use memory::MemStore;
pub use peers::Peers;
pub use volumes::Volumes;
