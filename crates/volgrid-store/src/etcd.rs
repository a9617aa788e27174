//! etcd-backed replicated store.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, EventType, GetOptions, LockOptions, WatchOptions};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use volgrid_core::config::StoreConfig;
use volgrid_core::{Error, ErrorCode, Result};

use crate::backend::{LockHandle, StoreBackend, WatchEvent, LOCK_PREFIX};

fn store_err(e: etcd_client::Error) -> Error {
    Error::unavailable(e.to_string())
}

/// Replicated store over an etcd cluster.
///
/// All keys are scoped under the configured prefix so that several
/// clusters can share one etcd installation.
pub struct EtcdStore {
    client: RwLock<Client>,
    prefix: String,
}

impl EtcdStore {
    /// Connects to the configured etcd endpoints.
    pub async fn new(config: &StoreConfig) -> Result<Self> {
        let client = Client::connect(&config.endpoints, None).await.map_err(store_err)?;
        info!(endpoints = ?config.endpoints, prefix = %config.prefix, "connected to etcd");
        Ok(Self { client: RwLock::new(client), prefix: config.prefix.clone() })
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn unscoped(&self, key: &[u8]) -> String {
        let key = String::from_utf8_lossy(key);
        key.strip_prefix(&self.prefix).unwrap_or(&key).to_string()
    }

    async fn client(&self) -> Client {
        self.client.read().await.clone()
    }
}

#[async_trait]
impl StoreBackend for EtcdStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut client = self.client().await;
        client.put(self.scoped(key), value, None).await.map_err(store_err)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut client = self.client().await;
        let resp = client.get(self.scoped(key), None).await.map_err(store_err)?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut client = self.client().await;
        client.delete(self.scoped(key), None).await.map_err(store_err)?;
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut client = self.client().await;
        let resp = client
            .get(self.scoped(prefix), Some(GetOptions::new().with_prefix()))
            .await
            .map_err(store_err)?;

        let mut out = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            out.push((self.unscoped(kv.key()), kv.value().to_vec()));
        }
        Ok(out)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let mut client = self.client().await;
        client
            .delete(self.scoped(prefix), Some(etcd_client::DeleteOptions::new().with_prefix()))
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn acquire_lock(&self, name: &str, ttl: Duration, wait: Duration) -> Result<LockHandle> {
        let mut client = self.client().await;

        let lease = client.lease_grant(ttl.as_secs() as i64, None).await.map_err(store_err)?;
        let lease_id = lease.id();

        let lock_key = self.scoped(&format!("{LOCK_PREFIX}{name}"));
        let options = LockOptions::new().with_lease(lease_id);

        match tokio::time::timeout(wait, client.lock(lock_key, Some(options))).await {
            Ok(Ok(resp)) => {
                debug!(lock = %name, lease_id, "acquired cluster lock");
                Ok(LockHandle { name: name.to_string(), lease_id, key: resp.key().to_vec() })
            }
            Ok(Err(e)) => {
                let _ = client.lease_revoke(lease_id).await;
                Err(store_err(e))
            }
            Err(_) => {
                // Revoking the lease aborts the queued lock attempt.
                let _ = client.lease_revoke(lease_id).await;
                Err(Error::op_with_resource(
                    ErrorCode::LockTimeout,
                    format!("timed out waiting for lock {name}"),
                    name,
                ))
            }
        }
    }

    async fn release_lock(&self, handle: &LockHandle) -> Result<()> {
        let mut client = self.client().await;
        client.unlock(handle.key.clone()).await.map_err(store_err)?;
        if let Err(e) = client.lease_revoke(handle.lease_id).await {
            warn!(lock = %handle.name, error = %e, "failed to revoke lock lease");
        }
        debug!(lock = %handle.name, "released cluster lock");
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>> {
        let mut client = self.client().await;
        let (watcher, mut stream) = client
            .watch(self.scoped(prefix), Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(store_err)?;

        let (tx, rx) = mpsc::channel(128);
        let scope = self.prefix.clone();
        tokio::spawn(async move {
            // Dropping the watcher cancels the stream; hold it here.
            let _watcher = watcher;
            while let Ok(Some(resp)) = stream.message().await {
                for event in resp.events() {
                    let Some(kv) = event.kv() else { continue };
                    let key = String::from_utf8_lossy(kv.key());
                    let key = key.strip_prefix(&scope).unwrap_or(&key).to_string();
                    let out = match event.event_type() {
                        EventType::Put => WatchEvent::Put { key, value: kv.value().to_vec() },
                        EventType::Delete => WatchEvent::Delete { key },
                    };
                    if tx.send(out).await.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn update_endpoints(&self) -> Result<()> {
        let mut client = self.client().await;
        let members = client.member_list().await.map_err(store_err)?;

        let endpoints: Vec<String> =
            members.members().iter().flat_map(|m| m.client_urls().iter().cloned()).collect();
        if endpoints.is_empty() {
            return Err(Error::unavailable("member list returned no client endpoints"));
        }

        let fresh = Client::connect(&endpoints, None).await.map_err(store_err)?;
        *self.client.write().await = fresh;
        info!(?endpoints, "refreshed store endpoints");
        Ok(())
    }
}
