//! Volume operation handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use tracing::info;
use uuid::Uuid;
use volgrid_cluster::BrickRuntimeStatus;
use volgrid_core::options::validate_options;
use volgrid_core::types::{
    BrickInfo, BrickType, Subvol, SubvolType, VolAuth, VolState, VolType, VolumeInfo,
};
use volgrid_core::{ClusterEvent, ErrorCode};
use volgrid_store::Peers;
use volgrid_txn::{create_lock_steps, Step};

use super::decode;
use crate::error::ApiError;
use crate::state::AppState;
use crate::steps::{
    CTX_FORCE, CTX_NEW_BRICKS, CTX_TARGET_STATE, CTX_VOLINFO, RESULT_BRICK_STATUS,
};
use crate::types::{
    BrickReq, BrickStatusResp, SubvolReq, VolCreateReq, VolExpandReq, VolumeResp,
    VolumeStatusResp,
};

/// Builds brick records from a request, resolving each brick's peer.
pub(crate) async fn new_brick_entries(
    peers: &Peers,
    bricks: &[BrickReq],
    volume_name: &str,
    volume_id: Uuid,
) -> Result<Vec<BrickInfo>, ApiError> {
    let mut entries = Vec::with_capacity(bricks.len());
    for brick in bricks {
        let peer = peers.get(brick.nodeid).await.map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                ApiError::new(
                    ErrorCode::InvalidArgument,
                    format!("brick node {} is not a cluster member", brick.nodeid),
                )
            } else {
                ApiError::from(e)
            }
        })?;
        let address = peer.addresses.first().ok_or_else(|| {
            ApiError::new(ErrorCode::Internal, format!("peer {} has no addresses", peer.id))
        })?;
        let hostname = address.split(':').next().unwrap_or(address).to_string();

        if !std::path::Path::new(&brick.path).is_absolute() {
            return Err(ApiError::new(
                ErrorCode::InvalidArgument,
                format!("brick path {:?} is not absolute", brick.path),
            ));
        }

        let ty = match brick.ty.as_deref() {
            Some("arbiter") => BrickType::Arbiter,
            _ => BrickType::Brick,
        };

        entries.push(BrickInfo {
            id: Uuid::new_v4(),
            node_id: brick.nodeid,
            hostname,
            path: brick.path.clone(),
            ty,
            volume_id,
            volume_name: volume_name.to_string(),
        });
    }
    Ok(entries)
}

fn subvol_type(name: &str) -> Result<SubvolType, ApiError> {
    match name {
        "distribute" => Ok(SubvolType::Distribute),
        "replicate" => Ok(SubvolType::Replicate),
        "disperse" => Ok(SubvolType::Disperse),
        other => Err(ApiError::new(
            ErrorCode::InvalidArgument,
            format!("unknown subvolume type {other:?}"),
        )),
    }
}

async fn build_subvol(
    peers: &Peers,
    req: &SubvolReq,
    index: usize,
    volume_name: &str,
    volume_id: Uuid,
) -> Result<Subvol, ApiError> {
    let ty = subvol_type(&req.ty)?;
    let replica = req.replica_count.unwrap_or(0);

    if ty == SubvolType::Replicate && replica == 0 {
        return Err(ApiError::new(ErrorCode::InvalidArgument, "replica count not specified"));
    }
    if replica > 0 && replica as usize != req.bricks.len() {
        return Err(ApiError::new(
            ErrorCode::InvalidArgument,
            format!(
                "replica count {replica} does not match brick count {}",
                req.bricks.len()
            ),
        ));
    }

    let arbiter = req.arbiter_count.unwrap_or(0);
    if arbiter != 0 && (arbiter != 1 || replica != 3) {
        return Err(ApiError::new(
            ErrorCode::InvalidArgument,
            "for an arbiter configuration, replica count must be 3 and arbiter count 1; \
             the third brick of the replica is the arbiter",
        ));
    }

    let mut bricks = new_brick_entries(peers, &req.bricks, volume_name, volume_id).await?;
    if arbiter == 1 {
        bricks[2].ty = BrickType::Arbiter;
    }

    Ok(Subvol {
        name: req.name.clone().unwrap_or_else(|| format!("s-{index}")),
        ty,
        bricks,
        replica_count: if replica == 0 { 1 } else { replica },
        arbiter_count: arbiter,
    })
}

/// Builds the initial volume record from a create request.
pub(crate) async fn build_volume(
    peers: &Peers,
    req: &VolCreateReq,
) -> Result<VolumeInfo, ApiError> {
    let id = Uuid::new_v4();
    let mut subvols = Vec::with_capacity(req.subvols.len());
    for (index, subvol_req) in req.subvols.iter().enumerate() {
        subvols.push(build_subvol(peers, subvol_req, index, &req.name, id).await?);
    }

    Ok(VolumeInfo {
        id,
        name: req.name.clone(),
        ty: VolType::from_subvols(&subvols),
        transport: req.transport.clone().unwrap_or_else(|| "tcp".to_string()),
        state: VolState::Created,
        dist_count: subvols.len() as u32,
        subvols,
        options: req.options.clone(),
        auth: VolAuth::generate(),
        version: 0,
        checksum: 0,
        heal_flag: false,
        granular_heal_entry: false,
    })
}

/// `POST /v1/volumes` - Create a volume.
pub async fn create(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: VolCreateReq = decode(&body)?;

    if req.name.is_empty() {
        return Err(ApiError::new(ErrorCode::InvalidArgument, "volume name is empty"));
    }
    if req.subvols.is_empty() {
        return Err(ApiError::new(ErrorCode::InvalidArgument, "subvolume list is empty"));
    }
    for subvol in &req.subvols {
        if subvol.bricks.is_empty() {
            return Err(ApiError::new(ErrorCode::InvalidArgument, "brick list is empty"));
        }
    }
    validate_options(&req.options)?;

    let services = &state.services;
    if services.volumes.exists(&req.name).await? {
        return Err(ApiError::new(
            ErrorCode::Conflict,
            format!("volume {} already exists", req.name),
        )
        .with_resource(&req.name));
    }

    let volume = build_volume(&services.peers, &req).await?;
    let nodes = volume.nodes();

    let mut txn = services.txn();
    let (lock, unlock) = create_lock_steps(&req.name);
    txn.steps = vec![
        lock,
        Step::new("vol-create.Validate", nodes).with_undo("vol-create.Rollback"),
        Step::new("vol-create.StoreVolume", vec![]),
        unlock,
    ];
    txn.ctx.set(CTX_VOLINFO, &volume)?;
    txn.ctx.set(CTX_FORCE, &req.force)?;

    let result = txn.run().await;
    txn.cleanup().await;
    result?;

    let committed: VolumeInfo = txn.ctx.get(CTX_VOLINFO)?;
    info!(volume = %committed.name, "new volume created");
    services.events.publish(ClusterEvent::VolumeCreated { volume: committed.clone() });

    Ok((StatusCode::CREATED, Json(VolumeResp::from(&committed))))
}

/// `POST /v1/volumes/{name}/expand` - Add bricks to a volume.
pub async fn expand(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: VolExpandReq = decode(&body)?;
    if req.bricks.is_empty() {
        return Err(ApiError::new(ErrorCode::InvalidArgument, "brick list is empty"));
    }

    let services = &state.services;
    let mut volume = services.volumes.get(&name).await?;

    let replica = volume.subvols.first().map_or(1, |s| s.replica_count);
    if let Some(requested) = req.replica_count {
        if requested != replica {
            return Err(ApiError::new(
                ErrorCode::InvalidArgument,
                format!(
                    "changing the replica count on expand is not supported (volume has {replica})"
                ),
            ));
        }
    }
    if req.bricks.len() % replica as usize != 0 {
        return Err(ApiError::new(
            ErrorCode::InvalidArgument,
            format!(
                "brick count {} is not a multiple of the replica count {replica}",
                req.bricks.len()
            ),
        ));
    }

    let new_bricks = new_brick_entries(&services.peers, &req.bricks, &name, volume.id).await?;
    let new_nodes: Vec<Uuid> = {
        let mut nodes = Vec::new();
        for brick in &new_bricks {
            if !nodes.contains(&brick.node_id) {
                nodes.push(brick.node_id);
            }
        }
        nodes
    };

    // New sub-volumes inherit the existing redundancy shape.
    let subvol_ty = volume.subvols.first().map_or(SubvolType::Distribute, |s| s.ty);
    let base = volume.subvols.len();
    for (index, chunk) in new_bricks.chunks(replica as usize).enumerate() {
        volume.subvols.push(Subvol {
            name: format!("s-{}", base + index),
            ty: subvol_ty,
            bricks: chunk.to_vec(),
            replica_count: replica,
            arbiter_count: 0,
        });
    }
    volume.dist_count = volume.subvols.len() as u32;
    volume.ty = VolType::from_subvols(&volume.subvols);

    let mut txn = services.txn();
    let (lock, unlock) = create_lock_steps(&name);
    txn.steps = vec![
        lock,
        Step::new("vol-expand.Validate", new_nodes).with_undo("vol-expand.Rollback"),
        Step::new("vol-expand.StoreVolume", vec![]),
        unlock,
    ];
    txn.ctx.set(CTX_VOLINFO, &volume)?;
    txn.ctx.set(CTX_NEW_BRICKS, &new_bricks)?;
    txn.ctx.set(CTX_FORCE, &false)?;

    let result = txn.run().await;
    txn.cleanup().await;
    result?;

    let committed: VolumeInfo = txn.ctx.get(CTX_VOLINFO)?;
    info!(volume = %committed.name, dist_count = committed.dist_count, "volume expanded");
    services.events.publish(ClusterEvent::VolumeExpanded { volume: committed.clone() });

    Ok(Json(VolumeResp::from(&committed)))
}

async fn change_state(
    state: &AppState,
    name: &str,
    target: VolState,
) -> Result<VolumeInfo, ApiError> {
    let services = &state.services;
    let volume = services.volumes.get(name).await?;

    if !volume.state.can_transition(target) {
        return Err(ApiError::new(
            ErrorCode::InvalidStateTransition,
            format!("volume {name} cannot transition from {} to {target}", volume.state),
        )
        .with_resource(name));
    }

    let nodes = volume.nodes();
    let mut txn = services.txn();
    let (lock, unlock) = create_lock_steps(name);
    let brick_step = match target {
        VolState::Started => {
            Step::new("vol-start.StartBricks", nodes).with_undo("vol-start.UndoStartBricks")
        }
        _ => Step::new("vol-stop.StopBricks", nodes).with_undo("vol-stop.UndoStopBricks"),
    };
    txn.steps = vec![lock, brick_step, Step::new("vol-state.UpdateVolinfo", vec![]), unlock];
    txn.ctx.set(CTX_VOLINFO, &volume)?;
    txn.ctx.set(CTX_TARGET_STATE, &target)?;

    let result = txn.run().await;
    txn.cleanup().await;
    result?;

    Ok(txn.ctx.get(CTX_VOLINFO)?)
}

/// `POST /v1/volumes/{name}/start` - Start a volume.
pub async fn start(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let committed = change_state(&state, &name, VolState::Started).await?;
    info!(volume = %name, "volume started");
    state.services.events.publish(ClusterEvent::VolumeStarted { volume: committed.clone() });
    Ok(Json(VolumeResp::from(&committed)))
}

/// `POST /v1/volumes/{name}/stop` - Stop a volume.
pub async fn stop(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let committed = change_state(&state, &name, VolState::Stopped).await?;
    info!(volume = %name, "volume stopped");
    state.services.events.publish(ClusterEvent::VolumeStopped { volume: committed.clone() });
    Ok(Json(VolumeResp::from(&committed)))
}

/// `DELETE /v1/volumes/{name}` - Delete a volume.
pub async fn delete(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let services = &state.services;
    let volume = services.volumes.get(&name).await?;

    if !volume.state.deletable() {
        return Err(ApiError::new(
            ErrorCode::InvalidStateTransition,
            format!("volume {name} is {}; delete requires Created or Stopped", volume.state),
        )
        .with_resource(&name));
    }

    let mut txn = services.txn();
    let (lock, unlock) = create_lock_steps(&name);
    txn.steps = vec![lock, Step::new("vol-delete.Commit", vec![]), unlock];
    txn.ctx.set(CTX_VOLINFO, &volume)?;

    let result = txn.run().await;
    txn.cleanup().await;
    result?;

    info!(volume = %name, "volume deleted");
    services
        .events
        .publish(ClusterEvent::VolumeDeleted { id: volume.id, name: volume.name.clone() });

    Ok(StatusCode::NO_CONTENT)
}

/// `GET /v1/volumes` - List volumes.
pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let volumes = state.services.volumes.list().await?;
    let resp: Vec<VolumeResp> = volumes.iter().map(VolumeResp::from).collect();
    Ok(Json(resp))
}

/// `GET /v1/volumes/{name}` - Volume info.
pub async fn get(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let volume = state.services.volumes.get(&name).await?;
    Ok(Json(VolumeResp::from(&volume)))
}

/// `GET /v1/volumes/{name}/status` - Per-brick runtime status.
pub async fn status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let services = &state.services;
    let volume = services.volumes.get(&name).await?;

    // Status is read-only; no cluster lock.
    let mut txn = services.txn();
    txn.steps = vec![Step::new("vol-status.Check", volume.nodes())];
    txn.ctx.set(CTX_VOLINFO, &volume)?;

    let result = txn.run().await;
    txn.cleanup().await;
    result?;

    let mut bricks = Vec::new();
    for brick in volume.bricks() {
        let status: BrickRuntimeStatus = txn
            .ctx
            .get_node_result(brick.node_id, &format!("{RESULT_BRICK_STATUS}/{}", brick.id))
            .unwrap_or_else(|_| BrickRuntimeStatus::offline());
        bricks.push(BrickStatusResp::new(brick, &status));
    }

    Ok(Json(VolumeStatusResp { bricks }))
}
