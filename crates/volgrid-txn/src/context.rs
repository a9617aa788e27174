//! Per-transaction context.
//!
//! The context is a key/value scratchpad shared by the steps of one
//! transaction. Global slots are serialized at set-time so that the
//! context is fully marshalable: before each step the initiator ships a
//! snapshot of the global slots to every participant, and participants
//! return their node-result deltas for the initiator to merge. A context
//! lives for the duration of one engine invocation only.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Span;
use uuid::Uuid;
use volgrid_core::{Error, ErrorCode, Result};

/// A serializable view of a context's global slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// The owning transaction.
    pub txn_id: Uuid,
    /// Milliseconds left until the transaction deadline.
    pub remaining_ms: u64,
    /// The global slots.
    pub slots: HashMap<String, Value>,
}

/// One per-node result entry produced by a step handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    /// The node the handler ran on.
    pub node: Uuid,
    /// Result slot name.
    pub key: String,
    /// Result value.
    pub value: Value,
}

/// The per-transaction scratchpad handed to step handlers.
pub struct TxnCtx {
    txn_id: Uuid,
    deadline: Instant,
    slots: DashMap<String, Value>,
    node_results: DashMap<(Uuid, String), Value>,
    span: Span,
}

impl TxnCtx {
    /// Creates a fresh context for transaction `txn_id`.
    #[must_use]
    pub fn new(txn_id: Uuid, deadline: Instant) -> Self {
        Self {
            txn_id,
            deadline,
            slots: DashMap::new(),
            node_results: DashMap::new(),
            span: tracing::info_span!("txn", id = %txn_id),
        }
    }

    /// Reconstructs a context from a shipped snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &ContextSnapshot) -> Self {
        let ctx = Self::new(
            snapshot.txn_id,
            Instant::now() + Duration::from_millis(snapshot.remaining_ms),
        );
        for (key, value) in &snapshot.slots {
            ctx.slots.insert(key.clone(), value.clone());
        }
        ctx
    }

    /// The owning transaction's ID.
    #[must_use]
    pub fn txn_id(&self) -> Uuid {
        self.txn_id
    }

    /// The transaction deadline.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether the transaction deadline has passed.
    #[must_use]
    pub fn deadline_exceeded(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// The tracing span bound to this transaction.
    #[must_use]
    pub fn span(&self) -> Span {
        self.span.clone()
    }

    /// Writes a global slot, overwriting any previous value.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.slots.insert(key.to_string(), value);
        Ok(())
    }

    /// Reads a global slot.
    ///
    /// # Errors
    ///
    /// `NotFound` when the slot was never set.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let Some(value) = self.slots.get(key) else {
            return Err(Error::op(
                ErrorCode::NotFound,
                format!("context key {key:?} not set"),
            ));
        };
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Writes a per-node result slot. Handlers call this on their local
    /// node; the initiator aggregates the entries after the step.
    pub fn set_node_result<T: Serialize>(&self, node: Uuid, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.node_results.insert((node, key.to_string()), value);
        Ok(())
    }

    /// Reads a per-node result slot.
    ///
    /// # Errors
    ///
    /// `NotFound` when the slot was never set.
    pub fn get_node_result<T: DeserializeOwned>(&self, node: Uuid, key: &str) -> Result<T> {
        let Some(value) = self.node_results.get(&(node, key.to_string())) else {
            return Err(Error::op(
                ErrorCode::NotFound,
                format!("node result {key:?} not set for node {node}"),
            ));
        };
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Serializes the global slots for shipping to a participant.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        ContextSnapshot {
            txn_id: self.txn_id,
            remaining_ms: remaining.as_millis() as u64,
            slots: self
                .slots
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }

    /// Drains every node-result entry as a delta list. Called on a
    /// participant after its handler ran; the context there is fresh, so
    /// every entry is new.
    #[must_use]
    pub fn take_node_results(&self) -> Vec<NodeResult> {
        let keys: Vec<(Uuid, String)> =
            self.node_results.iter().map(|e| e.key().clone()).collect();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((k, value)) = self.node_results.remove(&key) {
                out.push(NodeResult { node: k.0, key: k.1, value });
            }
        }
        out
    }

    /// Merges node-result deltas returned by a participant.
    pub fn merge_node_results(&self, deltas: Vec<NodeResult>) {
        for delta in deltas {
            self.node_results.insert((delta.node, delta.key), delta.value);
        }
    }
}
