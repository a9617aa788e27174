//! The transaction engine.
//!
//! A transaction is an ordered plan of steps bounded by a cluster-wide
//! lock acquire/release, with all-or-nothing semantics modulo
//! best-effort rollback. Steps execute strictly sequentially; within a
//! step, per-node execution is concurrent and unordered.
//!
//! Steps addressed to the initiator run in-process against the live
//! context, so later steps observe their mutations. Steps addressed to
//! peers ship a snapshot of the global slots and return node-result
//! deltas, which the engine merges back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use volgrid_core::config::TxnConfig;
use volgrid_core::{Error, ErrorCode, Result};
use volgrid_store::{LockHandle, Peers, StoreBackend, TXN_PREFIX};

use crate::context::TxnCtx;
use crate::dispatch::{StepDispatcher, StepRequest};
use crate::registry::Registry;
use crate::step::Step;

/// Engine tuning knobs for one transaction.
#[derive(Debug, Clone)]
pub struct TxnOptions {
    /// TTL of the cluster lock lease.
    pub lock_ttl: Duration,
    /// How long to wait for a contended lock.
    pub lock_wait: Duration,
    /// Overall transaction deadline.
    pub deadline: Duration,
}

impl Default for TxnOptions {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(60),
            lock_wait: Duration::from_secs(10),
            deadline: Duration::from_secs(180),
        }
    }
}

impl From<&TxnConfig> for TxnOptions {
    fn from(config: &TxnConfig) -> Self {
        Self {
            lock_ttl: Duration::from_secs(config.lock_ttl_secs),
            lock_wait: Duration::from_secs(config.lock_wait_secs),
            deadline: Duration::from_secs(config.deadline_secs),
        }
    }
}

/// Where a transaction currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Participant set being frozen.
    Planning,
    /// Waiting on the cluster lock.
    Locking,
    /// Running the step at this index.
    Running(usize),
    /// All steps succeeded; finishing up.
    Committing,
    /// A step failed; compensating handlers are running.
    RollingBack,
    /// Terminal success.
    Succeeded,
    /// Terminal failure.
    Failed,
}

/// One transaction: an ordered plan of steps plus the context shipped to
/// participants.
pub struct Txn {
    id: Uuid,
    /// The transaction's scratchpad.
    pub ctx: Arc<TxnCtx>,
    /// The ordered plan. Populate before calling [`run`](Self::run).
    pub steps: Vec<Step>,
    state: TxnState,
    store: Arc<dyn StoreBackend>,
    peers: Peers,
    registry: Arc<Registry>,
    dispatcher: Arc<dyn StepDispatcher>,
    local_node: Uuid,
    options: TxnOptions,
    locks: Vec<LockHandle>,
}

impl Txn {
    /// Creates an empty transaction.
    #[must_use]
    pub fn new(
        store: Arc<dyn StoreBackend>,
        peers: Peers,
        registry: Arc<Registry>,
        dispatcher: Arc<dyn StepDispatcher>,
        local_node: Uuid,
        options: TxnOptions,
    ) -> Self {
        let id = Uuid::new_v4();
        let ctx = Arc::new(TxnCtx::new(id, Instant::now() + options.deadline));
        Self {
            id,
            ctx,
            steps: Vec::new(),
            state: TxnState::Planning,
            store,
            peers,
            registry,
            dispatcher,
            local_node,
            options,
            locks: Vec::new(),
        }
    }

    /// The transaction ID.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Where the transaction currently stands.
    #[must_use]
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Executes the plan.
    ///
    /// Walks the steps in declared order, dispatching each to its node
    /// set in parallel and merging the returned node-result deltas into
    /// the context. On the first failure, compensating handlers of the
    /// already-executed steps run in reverse order (best effort), held
    /// locks are released, and the original error is returned verbatim.
    pub async fn run(&mut self) -> Result<()> {
        let started = Instant::now();
        let result = self.run_inner().await;

        // The lock is released on every exit path, success or not.
        self.release_locks().await;

        match &result {
            Ok(()) => {
                self.state = TxnState::Succeeded;
                counter!("volgrid_txn_total", "result" => "success").increment(1);
            }
            Err(e) => {
                self.state = TxnState::Failed;
                counter!("volgrid_txn_total", "result" => "failure").increment(1);
                info!(txn = %self.id, error = %e, "transaction failed");
            }
        }
        histogram!("volgrid_txn_duration_seconds").record(started.elapsed().as_secs_f64());
        result
    }

    async fn run_inner(&mut self) -> Result<()> {
        self.state = TxnState::Planning;
        self.check_participants().await?;

        let steps = self.steps.clone();
        for (index, step) in steps.iter().enumerate() {
            if step.is_lock() {
                self.state = TxnState::Locking;
                if let Err(e) = self.acquire_lock(step).await {
                    self.rollback(&steps[..index]).await;
                    return Err(e);
                }
                continue;
            }
            if step.is_unlock() {
                self.release_lock_named(step.lock_name.as_deref()).await;
                continue;
            }

            if self.ctx.deadline_exceeded() {
                let err = Error::op(
                    ErrorCode::Cancelled,
                    format!("transaction deadline exceeded before step {:?}", step.do_func),
                );
                self.rollback(&steps[..index]).await;
                return Err(err);
            }

            self.state = TxnState::Running(index);
            if let Err(e) = self.run_step(step).await {
                self.rollback(&steps[..index]).await;
                return Err(e);
            }
        }

        self.state = TxnState::Committing;
        Ok(())
    }

    /// Freezes the participant set: every targeted node must be the local
    /// node or a known peer.
    async fn check_participants(&self) -> Result<()> {
        let mut seen = Vec::new();
        for step in &self.steps {
            for node in &step.nodes {
                if *node == self.local_node || seen.contains(node) {
                    continue;
                }
                if !self.peers.exists(*node).await? {
                    return Err(Error::op_with_resource(
                        ErrorCode::NotFound,
                        format!("unknown peer {node} in transaction plan"),
                        node.to_string(),
                    ));
                }
                seen.push(*node);
            }
        }
        Ok(())
    }

    async fn acquire_lock(&mut self, step: &Step) -> Result<()> {
        let name = step
            .lock_name
            .as_deref()
            .ok_or_else(|| Error::internal("lock step without a lock name"))?;
        let handle = self
            .store
            .acquire_lock(name, self.options.lock_ttl, self.options.lock_wait)
            .await?;
        debug!(txn = %self.id, lock = %name, "transaction holds cluster lock");
        self.locks.push(handle);
        Ok(())
    }

    async fn release_lock_named(&mut self, name: Option<&str>) {
        let Some(name) = name else { return };
        let Some(position) = self.locks.iter().position(|l| l.name == name) else {
            warn!(txn = %self.id, lock = %name, "unlock step for a lock that is not held");
            return;
        };
        let handle = self.locks.remove(position);
        if let Err(e) = self.store.release_lock(&handle).await {
            warn!(txn = %self.id, lock = %name, error = %e, "failed to release cluster lock");
        }
    }

    /// Runs `name` on `node`: in-process against the live context for
    /// the initiator, via the dispatcher for peers. Peer node-result
    /// deltas are merged into the live context on success.
    async fn run_on_node(&self, node: Uuid, name: &str) -> Result<()> {
        if node == self.local_node {
            let Some(handler) = self.registry.get(name) else {
                return Err(Error::internal(format!("unknown step function {name:?}")));
            };
            return handler(Arc::clone(&self.ctx)).await;
        }

        let request =
            StepRequest { txn_id: self.id, step_name: name.to_string(), ctx: self.ctx.snapshot() };
        let response = self.dispatcher.run_step(node, request).await?;
        match response.error {
            Some(step_error) => Err(step_error.into_error()),
            None => {
                self.ctx.merge_node_results(response.results);
                Ok(())
            }
        }
    }

    /// Dispatches one step to its node set in parallel. Returns the
    /// first error seen, in node declaration order.
    async fn run_step(&self, step: &Step) -> Result<()> {
        let nodes = if step.nodes.is_empty() {
            vec![self.local_node]
        } else {
            step.nodes.clone()
        };
        debug!(txn = %self.id, step = %step.do_func, nodes = nodes.len(), "running step");

        let started = Instant::now();
        let dispatches = nodes.iter().map(|node| {
            let node = *node;
            async move {
                match tokio::time::timeout(step.timeout, self.run_on_node(node, &step.do_func))
                    .await
                {
                    Ok(result) => (node, result),
                    Err(_) => (
                        node,
                        Err(Error::op(
                            ErrorCode::StepTimeout,
                            format!("step {:?} timed out on node {node}", step.do_func),
                        )),
                    ),
                }
            }
        });

        let mut first_error: Option<Error> = None;
        for (node, outcome) in join_all(dispatches).await {
            if let Err(e) = outcome {
                warn!(txn = %self.id, step = %step.do_func, node = %node, error = %e,
                    "step failed on node");
                first_error.get_or_insert(e);
            }
        }
        histogram!("volgrid_txn_step_duration_seconds", "step" => step.do_func.clone())
            .record(started.elapsed().as_secs_f64());

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Runs the compensating handlers of the already-executed steps in
    /// reverse order. Best effort: failures are logged, never surfaced.
    async fn rollback(&mut self, executed: &[Step]) {
        self.state = TxnState::RollingBack;
        let this: &Txn = self;
        for step in executed.iter().rev() {
            if step.is_lock() || step.is_unlock() {
                continue;
            }
            let Some(undo) = &step.undo_func else { continue };

            let nodes = if step.nodes.is_empty() {
                vec![this.local_node]
            } else {
                step.nodes.clone()
            };
            debug!(txn = %this.id, step = %undo, "rolling back step");

            let dispatches = nodes.iter().map(|node| {
                let node = *node;
                async move { (node, this.run_on_node(node, undo).await) }
            });
            for (node, outcome) in join_all(dispatches).await {
                if let Err(e) = outcome {
                    error!(txn = %this.id, step = %undo, node = %node, error = %e,
                        "rollback failed on node");
                }
            }
        }
    }

    async fn release_locks(&mut self) {
        for handle in std::mem::take(&mut self.locks) {
            if let Err(e) = self.store.release_lock(&handle).await {
                warn!(txn = %self.id, lock = %handle.name, error = %e,
                    "failed to release cluster lock");
            }
        }
    }

    /// Frees every resource the transaction may still hold: remaining
    /// locks and the ephemeral `txn/<id>/` store keys. Callers invoke
    /// this on all exit paths.
    pub async fn cleanup(&mut self) {
        self.release_locks().await;
        let prefix = format!("{TXN_PREFIX}{}/", self.id);
        if let Err(e) = self.store.delete_prefix(&prefix).await {
            warn!(txn = %self.id, error = %e, "failed to flush transaction scratch keys");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use volgrid_core::types::Peer;
    use volgrid_store::MemStore;

    use super::*;
    use crate::dispatch::LocalDispatcher;
    use crate::step::create_lock_steps;

    struct Fixture {
        store: Arc<MemStore>,
        peers: Peers,
        registry: Arc<Registry>,
        local_node: Uuid,
        trace: Arc<Mutex<Vec<String>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(MemStore::new());
            Self {
                peers: Peers::new(store.clone()),
                store,
                registry: Arc::new(Registry::new()),
                local_node: Uuid::new_v4(),
                trace: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn record(&self, name: &str) {
            let trace = Arc::clone(&self.trace);
            let name = name.to_string();
            self.registry.register(&name.clone(), move |_| {
                let trace = Arc::clone(&trace);
                let name = name.clone();
                async move {
                    trace.lock().unwrap().push(name);
                    Ok(())
                }
            });
        }

        fn record_failing(&self, name: &str) {
            let trace = Arc::clone(&self.trace);
            let name = name.to_string();
            self.registry.register(&name.clone(), move |_| {
                let trace = Arc::clone(&trace);
                let name = name.clone();
                async move {
                    trace.lock().unwrap().push(name.clone());
                    Err(Error::op(ErrorCode::StepFailed, format!("{name} exploded")))
                }
            });
        }

        fn txn(&self) -> Txn {
            let options = TxnOptions {
                lock_ttl: Duration::from_secs(5),
                lock_wait: Duration::from_millis(100),
                deadline: Duration::from_secs(30),
            };
            Txn::new(
                self.store.clone(),
                self.peers.clone(),
                Arc::clone(&self.registry),
                Arc::new(LocalDispatcher::new(Arc::clone(&self.registry))),
                self.local_node,
                options,
            )
        }

        fn trace(&self) -> Vec<String> {
            self.trace.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let fx = Fixture::new();
        fx.record("a.One");
        fx.record("a.Two");
        fx.record("a.Three");

        let mut txn = fx.txn();
        let (lock, unlock) = create_lock_steps("vol");
        txn.steps = vec![
            lock,
            Step::new("a.One", vec![]),
            Step::new("a.Two", vec![]),
            Step::new("a.Three", vec![]),
            unlock,
        ];
        txn.run().await.unwrap();
        txn.cleanup().await;

        assert_eq!(fx.trace(), vec!["a.One", "a.Two", "a.Three"]);
        assert_eq!(txn.state(), TxnState::Succeeded);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_in_reverse() {
        let fx = Fixture::new();
        fx.record("b.One");
        fx.record("b.UndoOne");
        fx.record("b.Two");
        fx.record("b.UndoTwo");
        fx.record_failing("b.Boom");

        let mut txn = fx.txn();
        let (lock, unlock) = create_lock_steps("vol");
        txn.steps = vec![
            lock,
            Step::new("b.One", vec![]).with_undo("b.UndoOne"),
            Step::new("b.Two", vec![]).with_undo("b.UndoTwo"),
            Step::new("b.Boom", vec![]),
            unlock,
        ];
        let err = txn.run().await.unwrap_err();
        txn.cleanup().await;

        assert_eq!(err.code(), ErrorCode::StepFailed);
        assert_eq!(err.to_string(), "StepFailed: b.Boom exploded");
        assert_eq!(fx.trace(), vec!["b.One", "b.Two", "b.Boom", "b.UndoTwo", "b.UndoOne"]);
        assert_eq!(txn.state(), TxnState::Failed);
    }

    #[tokio::test]
    async fn test_steps_without_undo_are_skipped_in_rollback() {
        let fx = Fixture::new();
        fx.record("c.NoUndo");
        fx.record("c.WithUndo");
        fx.record("c.Undo");
        fx.record_failing("c.Boom");

        let mut txn = fx.txn();
        txn.steps = vec![
            Step::new("c.NoUndo", vec![]),
            Step::new("c.WithUndo", vec![]).with_undo("c.Undo"),
            Step::new("c.Boom", vec![]),
        ];
        txn.run().await.unwrap_err();

        assert_eq!(fx.trace(), vec!["c.NoUndo", "c.WithUndo", "c.Boom", "c.Undo"]);
    }

    #[tokio::test]
    async fn test_rollback_failure_is_swallowed() {
        let fx = Fixture::new();
        fx.record("d.One");
        fx.record_failing("d.UndoOne");
        fx.record_failing("d.Boom");

        let mut txn = fx.txn();
        txn.steps = vec![
            Step::new("d.One", vec![]).with_undo("d.UndoOne"),
            Step::new("d.Boom", vec![]),
        ];
        let err = txn.run().await.unwrap_err();

        // The original cause is surfaced, not the rollback failure.
        assert_eq!(err.to_string(), "StepFailed: d.Boom exploded");
        assert_eq!(fx.trace(), vec!["d.One", "d.Boom", "d.UndoOne"]);
    }

    #[tokio::test]
    async fn test_lock_contention_returns_lock_timeout() {
        let fx = Fixture::new();
        fx.record("e.Step");

        let held = fx
            .store
            .acquire_lock("contended", Duration::from_secs(10), Duration::from_millis(50))
            .await
            .unwrap();

        let mut txn = fx.txn();
        let (lock, unlock) = create_lock_steps("contended");
        txn.steps = vec![lock, Step::new("e.Step", vec![]), unlock];
        let err = txn.run().await.unwrap_err();
        txn.cleanup().await;

        assert_eq!(err.code(), ErrorCode::LockTimeout);
        // No user step ran.
        assert!(fx.trace().is_empty());

        fx.store.release_lock(&held).await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_released_after_failure() {
        let fx = Fixture::new();
        fx.record_failing("f.Boom");

        let mut txn = fx.txn();
        let (lock, unlock) = create_lock_steps("vol");
        txn.steps = vec![lock, Step::new("f.Boom", vec![]), unlock];
        txn.run().await.unwrap_err();
        txn.cleanup().await;

        // The lock is free again.
        let handle = fx
            .store
            .acquire_lock("vol", Duration::from_secs(5), Duration::from_millis(100))
            .await
            .unwrap();
        fx.store.release_lock(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_peer_fails_before_any_step() {
        let fx = Fixture::new();
        fx.record("g.Step");

        let stranger = Uuid::new_v4();
        let mut txn = fx.txn();
        txn.steps = vec![Step::new("g.Step", vec![stranger])];
        let err = txn.run().await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::NotFound);
        assert!(fx.trace().is_empty());
    }

    #[tokio::test]
    async fn test_known_peer_is_accepted() {
        let fx = Fixture::new();
        fx.record("h.Step");

        let peer = Peer {
            id: Uuid::new_v4(),
            name: "node-2".to_string(),
            addresses: vec!["node-2:24007".to_string()],
        };
        fx.peers.upsert(&peer).await.unwrap();

        let mut txn = fx.txn();
        txn.steps = vec![Step::new("h.Step", vec![peer.id])];
        txn.run().await.unwrap();
        assert_eq!(fx.trace(), vec!["h.Step"]);
    }

    #[tokio::test]
    async fn test_unknown_step_is_internal_error() {
        let fx = Fixture::new();
        let mut txn = fx.txn();
        txn.steps = vec![Step::new("no.Such", vec![])];
        let err = txn.run().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
    }

    #[tokio::test]
    async fn test_step_timeout_triggers_rollback() {
        let fx = Fixture::new();
        fx.record("i.One");
        fx.record("i.UndoOne");
        fx.registry.register("i.Slow", |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let mut txn = fx.txn();
        txn.steps = vec![
            Step::new("i.One", vec![]).with_undo("i.UndoOne"),
            Step::new("i.Slow", vec![]).with_timeout(Duration::from_millis(50)),
        ];
        let err = txn.run().await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::StepTimeout);
        assert_eq!(fx.trace(), vec!["i.One", "i.UndoOne"]);
    }

    #[tokio::test]
    async fn test_expired_deadline_cancels_plan() {
        let fx = Fixture::new();
        fx.record("j.Step");

        let mut txn = fx.txn();
        // Force the deadline into the past.
        txn.ctx = Arc::new(TxnCtx::new(txn.id(), Instant::now() - Duration::from_secs(1)));
        txn.steps = vec![Step::new("j.Step", vec![])];
        let err = txn.run().await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::Cancelled);
        assert!(fx.trace().is_empty());
    }

    #[tokio::test]
    async fn test_node_results_from_local_step() {
        let fx = Fixture::new();
        let node = fx.local_node;
        fx.registry.register("k.Report", move |ctx: Arc<TxnCtx>| async move {
            ctx.set_node_result(node, "pid", &4242u32)
        });

        let mut txn = fx.txn();
        txn.steps = vec![Step::new("k.Report", vec![])];
        txn.run().await.unwrap();

        let pid: u32 = txn.ctx.get_node_result(node, "pid").unwrap();
        assert_eq!(pid, 4242);
    }

    #[tokio::test]
    async fn test_node_results_merged_from_peer() {
        let fx = Fixture::new();
        let peer = Peer {
            id: Uuid::new_v4(),
            name: "node-2".to_string(),
            addresses: vec!["node-2:24007".to_string()],
        };
        fx.peers.upsert(&peer).await.unwrap();

        let peer_id = peer.id;
        fx.registry.register("k.Remote", move |ctx: Arc<TxnCtx>| async move {
            ctx.set_node_result(peer_id, "pid", &7u32)
        });

        let mut txn = fx.txn();
        txn.steps = vec![Step::new("k.Remote", vec![peer.id])];
        txn.run().await.unwrap();

        // The delta produced on the (simulated) peer landed on the
        // initiator's context.
        let pid: u32 = txn.ctx.get_node_result(peer_id, "pid").unwrap();
        assert_eq!(pid, 7);
    }

    #[tokio::test]
    async fn test_later_steps_observe_initiator_mutations() {
        let fx = Fixture::new();
        fx.registry.register("l.Produce", |ctx: Arc<TxnCtx>| async move {
            ctx.set("token", &"from-step-one")
        });
        let seen = Arc::new(Mutex::new(String::new()));
        let seen_in_step = Arc::clone(&seen);
        fx.registry.register("l.Consume", move |ctx: Arc<TxnCtx>| {
            let seen = Arc::clone(&seen_in_step);
            async move {
                let token: String = ctx.get("token")?;
                *seen.lock().unwrap() = token;
                Ok(())
            }
        });

        let mut txn = fx.txn();
        txn.steps = vec![Step::new("l.Produce", vec![]), Step::new("l.Consume", vec![])];
        txn.run().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), "from-step-one");
    }

    #[tokio::test]
    async fn test_cleanup_flushes_scratch_keys() {
        let fx = Fixture::new();
        let mut txn = fx.txn();
        let scratch = format!("txn/{}/reserved/a", txn.id());
        fx.store.put(&scratch, b"x".to_vec()).await.unwrap();

        txn.cleanup().await;
        assert_eq!(fx.store.get(&scratch).await.unwrap(), None);
    }
}
