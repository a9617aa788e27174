//! Store backend trait definition.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use volgrid_core::Result;

/// Key prefix for peer records.
pub const PEER_PREFIX: &str = "peers/";
/// Key prefix for volume records.
pub const VOLUME_PREFIX: &str = "volumes/";
/// Key prefix for cluster lock leases.
pub const LOCK_PREFIX: &str = "locks/";
/// Key prefix for per-transaction scratch keys.
pub const TXN_PREFIX: &str = "txn/";

/// A held cluster lock.
///
/// The lock is backed by a lease: if the holding process dies, the lease
/// expires and the lock frees itself. Release explicitly via
/// [`StoreBackend::release_lock`].
#[derive(Debug, Clone)]
pub struct LockHandle {
    /// The lock name (the `locks/<name>` suffix).
    pub name: String,
    /// Backend lease identifier.
    pub lease_id: i64,
    /// Backend lock ownership key.
    pub key: Vec<u8>,
}

/// A change observed under a watched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A key was written.
    Put {
        /// The written key.
        key: String,
        /// The new value.
        value: Vec<u8>,
    },
    /// A key was deleted.
    Delete {
        /// The deleted key.
        key: String,
    },
}

/// Strongly consistent, linearizable key-value store with leased locks
/// and prefix watches.
///
/// Values are opaque bytes; the callers of this trait store JSON. An
/// operation fails only with `Unavailable` (no quorum) or `Conflict`
/// (stale revision); `LockTimeout` is additionally possible for
/// [`acquire_lock`](StoreBackend::acquire_lock).
#[async_trait]
pub trait StoreBackend: Send + Sync + 'static {
    /// Writes `value` under `key`, overwriting any previous value.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Reads the value under `key`, if present.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Deletes `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Returns all `(key, value)` pairs under `prefix`, ordered by key.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Deletes every key under `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;

    /// Acquires the cluster lock `locks/<name>` under a lease of `ttl`,
    /// waiting up to `wait` for a contended lock.
    ///
    /// # Errors
    ///
    /// `LockTimeout` when the lock stays contended beyond `wait`;
    /// `Unavailable` when the store has no quorum.
    async fn acquire_lock(&self, name: &str, ttl: Duration, wait: Duration) -> Result<LockHandle>;

    /// Releases a held lock and revokes its lease.
    async fn release_lock(&self, handle: &LockHandle) -> Result<()>;

    /// Subscribes to changes under `prefix`.
    async fn watch(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>>;

    /// Refreshes the client's view of the serving peer set.
    async fn update_endpoints(&self) -> Result<()>;
}
