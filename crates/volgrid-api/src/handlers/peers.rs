//! Peer operation handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::{info, warn};
use uuid::Uuid;
use volgrid_core::{ClusterEvent, ErrorCode};

use crate::error::ApiError;
use crate::state::AppState;
use crate::types::PeerResp;

fn parse_peer_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| {
        ApiError::new(ErrorCode::InvalidArgument, format!("invalid peer id {raw:?}"))
    })
}

/// `GET /v1/peers` - List cluster members.
pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let peers = state.services.peers.list().await?;
    let resp: Vec<PeerResp> = peers.iter().map(PeerResp::from).collect();
    Ok(Json(resp))
}

/// `GET /v1/peers/{peerid}` - Peer info.
pub async fn get(
    State(state): State<AppState>,
    Path(peerid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_peer_id(&peerid)?;
    let peer = state.services.peers.get(id).await?;
    Ok(Json(PeerResp::from(&peer)))
}

/// `DELETE /v1/peers/{peerid}` - Remove a peer from the cluster.
///
/// Removing a peer happens as follows: check that the peer is a member,
/// that it is not this node, and that no volume has bricks on it; then
/// delete the record, send the leave request, and refresh the store
/// endpoints. The leave request and the endpoint refresh are best
/// effort: the committed record deletion stands even if they fail.
pub async fn delete(
    State(state): State<AppState>,
    Path(peerid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_peer_id(&peerid)?;
    let services = &state.services;

    let peer = services.peers.get(id).await?;

    if id == services.node_id {
        return Err(ApiError::new(
            ErrorCode::InvalidArgument,
            "removing this node from its own cluster is disallowed",
        ));
    }

    if services.volumes.bricks_exist_on(id).await? {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            format!("cannot delete peer {id}: peer has bricks"),
        )
        .with_resource(id.to_string()));
    }

    services.peers.delete(id).await?;
    info!(peer = %id, "removed peer from the cluster");

    // Best effort from here on; the store deletion is already committed.
    match peer.addresses.first() {
        Some(address) => {
            if let Err(e) = services.peer_rpc.leave_cluster(address).await {
                warn!(peer = %id, address = %address, error = %e,
                    "leave request failed; peer may still believe it is a member");
            }
        }
        None => warn!(peer = %id, "peer record has no addresses; skipping leave request"),
    }
    if let Err(e) = services.store.update_endpoints().await {
        warn!(error = %e, "failed to refresh store endpoints after peer removal");
    }

    services.events.publish(ClusterEvent::PeerLeft { peer });

    Ok(StatusCode::NO_CONTENT)
}
