//! Step dispatch to participant nodes.
//!
//! The engine hands each step to a [`StepDispatcher`]; the dispatcher
//! decides how the step reaches the target node. [`LocalDispatcher`]
//! executes every step in-process and backs single-node deployments and
//! tests; the HTTP dispatcher in the cluster crate routes remote nodes
//! over the peer RPC adapter.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;
use volgrid_core::{Error, ErrorCode, Result};

use crate::context::{ContextSnapshot, NodeResult, TxnCtx};
use crate::registry::Registry;

/// A step dispatch message shipped to a participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRequest {
    /// The owning transaction.
    pub txn_id: Uuid,
    /// Registered name of the handler to run.
    pub step_name: String,
    /// Snapshot of the initiator's global context slots.
    pub ctx: ContextSnapshot,
}

/// A typed error carried in a step response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepError {
    /// The error code.
    pub code: ErrorCode,
    /// The handler's error message, verbatim.
    pub message: String,
}

impl StepError {
    /// Converts back into a core error.
    #[must_use]
    pub fn into_error(self) -> Error {
        Error::op(self.code, self.message)
    }
}

impl From<&Error> for StepError {
    fn from(err: &Error) -> Self {
        Self { code: err.code(), message: err.to_string() }
    }
}

/// The outcome of running one step on one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResponse {
    /// Node-result deltas written by the handler.
    pub results: Vec<NodeResult>,
    /// The handler's error, if it failed.
    pub error: Option<StepError>,
}

/// Ships step requests to participant nodes and returns their results.
#[async_trait]
pub trait StepDispatcher: Send + Sync + 'static {
    /// Runs `request` on `node` and returns the node's response.
    ///
    /// # Errors
    ///
    /// Transport-level failures only; a handler failure travels inside
    /// the response.
    async fn run_step(&self, node: Uuid, request: StepRequest) -> Result<StepResponse>;
}

/// Resolves the step in `registry` and executes it in-process.
///
/// Used by the local dispatcher and by the peer RPC server on the
/// receiving side of a remote dispatch.
pub async fn execute_local(registry: &Registry, request: &StepRequest) -> StepResponse {
    let Some(handler) = registry.get(&request.step_name) else {
        return StepResponse {
            results: Vec::new(),
            error: Some(StepError {
                code: ErrorCode::Internal,
                message: format!("unknown step function {:?}", request.step_name),
            }),
        };
    };

    let ctx = Arc::new(TxnCtx::from_snapshot(&request.ctx));
    let span = ctx.span();
    match handler(Arc::clone(&ctx)).instrument(span).await {
        Ok(()) => StepResponse { results: ctx.take_node_results(), error: None },
        Err(e) => StepResponse { results: Vec::new(), error: Some(StepError::from(&e)) },
    }
}

/// Dispatcher that executes every step on the local process, regardless
/// of the addressed node.
pub struct LocalDispatcher {
    registry: Arc<Registry>,
}

impl LocalDispatcher {
    /// Creates a dispatcher over `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl StepDispatcher for LocalDispatcher {
    async fn run_step(&self, _node: Uuid, request: StepRequest) -> Result<StepResponse> {
        Ok(execute_local(&self.registry, &request).await)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn snapshot_with(key: &str, value: &str) -> ContextSnapshot {
        let ctx = TxnCtx::new(Uuid::new_v4(), Instant::now() + Duration::from_secs(5));
        ctx.set(key, &value).unwrap();
        ctx.snapshot()
    }

    #[tokio::test]
    async fn test_execute_local_success_returns_deltas() {
        let registry = Registry::new();
        let node = Uuid::new_v4();
        registry.register("t.Produce", move |ctx: Arc<TxnCtx>| async move {
            let input: String = ctx.get("input")?;
            ctx.set_node_result(node, "echo", &input)
        });

        let request = StepRequest {
            txn_id: Uuid::new_v4(),
            step_name: "t.Produce".to_string(),
            ctx: snapshot_with("input", "ping"),
        };
        let response = execute_local(&registry, &request).await;
        assert!(response.error.is_none());
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].key, "echo");
    }

    #[tokio::test]
    async fn test_execute_local_handler_error() {
        let registry = Registry::new();
        registry.register("t.Fail", |_| async {
            Err(Error::invalid_argument("bad brick"))
        });

        let request = StepRequest {
            txn_id: Uuid::new_v4(),
            step_name: "t.Fail".to_string(),
            ctx: snapshot_with("k", "v"),
        };
        let response = execute_local(&registry, &request).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, ErrorCode::InvalidArgument);
        assert!(response.results.is_empty());
    }

    #[tokio::test]
    async fn test_execute_local_unknown_step() {
        let registry = Registry::new();
        let request = StepRequest {
            txn_id: Uuid::new_v4(),
            step_name: "no.Such".to_string(),
            ctx: snapshot_with("k", "v"),
        };
        let response = execute_local(&registry, &request).await;
        assert_eq!(response.error.unwrap().code, ErrorCode::Internal);
    }

    #[tokio::test]
    async fn test_step_error_round_trip() {
        let err = Error::op(ErrorCode::StepFailed, "boom");
        let wire = StepError::from(&err);
        let json = serde_json::to_string(&wire).unwrap();
        let back: StepError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.code, ErrorCode::StepFailed);
        assert_eq!(back.into_error().code(), ErrorCode::StepFailed);
    }
}
