//! Process-local store backend.
//!
//! Implements the same contract as the etcd backend over in-process
//! state, including lock leases with TTL takeover. Used by tests and by
//! single-node development deployments (`store.backend = "memory"`).

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};
use volgrid_core::{Error, ErrorCode, Result};

use crate::backend::{LockHandle, StoreBackend, WatchEvent};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct HeldLock {
    lease_id: i64,
    expires_at: Instant,
}

/// In-memory [`StoreBackend`].
pub struct MemStore {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
    locks: Mutex<HashMap<String, HeldLock>>,
    next_lease: Mutex<i64>,
    watch_tx: broadcast::Sender<WatchEvent>,
}

impl MemStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (watch_tx, _) = broadcast::channel(1024);
        Self {
            data: Mutex::new(BTreeMap::new()),
            locks: Mutex::new(HashMap::new()),
            next_lease: Mutex::new(1),
            watch_tx,
        }
    }

    fn notify(&self, event: WatchEvent) {
        let _ = self.watch_tx.send(event);
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreBackend for MemStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.data.lock().await.insert(key.to_string(), value.clone());
        self.notify(WatchEvent::Put { key: key.to_string(), value });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.data.lock().await.remove(key).is_some() {
            self.notify(WatchEvent::Delete { key: key.to_string() });
        }
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let data = self.data.lock().await;
        Ok(data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let removed: Vec<String> = {
            let mut data = self.data.lock().await;
            let keys: Vec<String> = data
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                data.remove(key);
            }
            keys
        };
        for key in removed {
            self.notify(WatchEvent::Delete { key });
        }
        Ok(())
    }

    async fn acquire_lock(&self, name: &str, ttl: Duration, wait: Duration) -> Result<LockHandle> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut locks = self.locks.lock().await;
                let now = Instant::now();
                let free = match locks.get(name) {
                    None => true,
                    // An expired lease means the holder died; take over.
                    Some(held) => held.expires_at <= now,
                };
                if free {
                    let lease_id = {
                        let mut next = self.next_lease.lock().await;
                        *next += 1;
                        *next
                    };
                    locks.insert(
                        name.to_string(),
                        HeldLock { lease_id, expires_at: now + ttl },
                    );
                    return Ok(LockHandle { name: name.to_string(), lease_id, key: Vec::new() });
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::op_with_resource(
                    ErrorCode::LockTimeout,
                    format!("timed out waiting for lock {name}"),
                    name,
                ));
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn release_lock(&self, handle: &LockHandle) -> Result<()> {
        let mut locks = self.locks.lock().await;
        if let Some(held) = locks.get(&handle.name) {
            if held.lease_id == handle.lease_id {
                locks.remove(&handle.name);
            }
        }
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>> {
        let mut source = self.watch_tx.subscribe();
        let (tx, rx) = mpsc::channel(128);
        let prefix = prefix.to_string();
        tokio::spawn(async move {
            while let Ok(event) = source.recv().await {
                let key = match &event {
                    WatchEvent::Put { key, .. } | WatchEvent::Delete { key } => key,
                };
                if key.starts_with(&prefix) && tx.send(event.clone()).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn update_endpoints(&self) -> Result<()> {
        Ok(())
    }
}
