//! Internal peer-facing routes.
//!
//! These endpoints are the receiving side of the peer RPC adapter: step
//! dispatch and the leave-cluster request. They are not part of the
//! client API.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tracing::{debug, info};
use volgrid_txn::{execute_local, StepRequest, StepResponse};

use crate::state::AppState;

/// `POST /internal/txn/step` - Run a transaction step on this node.
pub async fn run_step(
    State(state): State<AppState>,
    Json(request): Json<StepRequest>,
) -> Json<StepResponse> {
    debug!(txn = %request.txn_id, step = %request.step_name, "executing dispatched step");
    Json(execute_local(&state.services.registry, &request).await)
}

/// `POST /internal/cluster/leave` - Accept removal from the cluster.
///
/// The initiating node has already deleted this peer's record; the local
/// daemon just acknowledges and stops treating itself as a member on the
/// next restart.
pub async fn leave(State(state): State<AppState>) -> StatusCode {
    info!(node_id = %state.services.node_id, "this node was removed from the cluster");
    StatusCode::NO_CONTENT
}
