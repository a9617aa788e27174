//! Process-local step registry.
//!
//! Maps step names to in-process handlers. Command modules register
//! their step functions during process start; the registry is frozen
//! before the first request is served and read-only thereafter. Remote
//! dispatch uses the step name as the wire identifier.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use volgrid_core::Result;

use crate::context::TxnCtx;

/// The future returned by a step handler.
pub type StepFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// A registered step handler.
pub type StepFn = Arc<dyn Fn(Arc<TxnCtx>) -> StepFuture + Send + Sync>;

/// Name → handler table for transaction steps.
pub struct Registry {
    steps: DashMap<String, StepFn>,
    frozen: AtomicBool,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { steps: DashMap::new(), frozen: AtomicBool::new(false) }
    }

    /// Registers a step handler under `name`.
    ///
    /// # Panics
    ///
    /// Panics when called after [`freeze`](Self::freeze) or when `name`
    /// is already registered; both are process-initialization bugs.
    pub fn register<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(Arc<TxnCtx>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        assert!(
            !self.frozen.load(Ordering::Acquire),
            "step {name:?} registered after registry freeze"
        );
        let handler: StepFn = Arc::new(move |ctx| Box::pin(handler(ctx)));
        let previous = self.steps.insert(name.to_string(), handler);
        assert!(previous.is_none(), "step {name:?} registered twice");
    }

    /// Marks the registry read-only.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Looks up a step handler by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<StepFn> {
        self.steps.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether a step with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
