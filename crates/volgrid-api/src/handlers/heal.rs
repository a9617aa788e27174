//! Self-heal service handlers.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;
use volgrid_cluster::parse_heal_info;
use volgrid_core::types::VolumeInfo;
use volgrid_core::{ErrorCode, Result as CoreResult};
use volgrid_txn::{create_lock_steps, Step};

use crate::error::ApiError;
use crate::state::AppState;
use crate::steps::{CTX_VOLINFO, CTX_VOLNAME};
use crate::types::{HealInfoResp, VolumeResp};

fn check_heal_capable(volume: &VolumeInfo) -> Result<(), ApiError> {
    if !volume.ty.is_heal_capable() {
        return Err(ApiError::new(
            ErrorCode::InvalidArgument,
            format!("volume type {} does not support self-heal", volume.ty),
        )
        .with_resource(&volume.name));
    }
    Ok(())
}

async fn toggle_heal(state: &AppState, name: &str, enable: bool) -> Result<VolumeInfo, ApiError> {
    let services = &state.services;
    let mut volume = services.volumes.get(name).await?;
    check_heal_capable(&volume)?;

    volume.heal_flag = enable;

    let nodes = volume.nodes();
    let commit_step =
        if enable { "selfheal-start.Commit" } else { "selfheal-stop.Commit" };

    let mut txn = services.txn();
    let (lock, unlock) = create_lock_steps(name);
    txn.steps = vec![
        lock,
        Step::new("vol-option.UpdateVolinfo", vec![]),
        Step::new(commit_step, nodes),
        unlock,
    ];
    txn.ctx.set(CTX_VOLINFO, &volume)?;

    let result = txn.run().await;
    txn.cleanup().await;
    result?;

    Ok(txn.ctx.get(CTX_VOLINFO)?)
}

/// `POST /v1/volumes/{name}/heal/enable` - Enable the self-heal service.
pub async fn enable(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let committed = toggle_heal(&state, &name, true).await?;
    info!(volume = %name, "self-heal enabled");
    Ok(Json(VolumeResp::from(&committed)))
}

/// `POST /v1/volumes/{name}/heal/disable` - Disable the self-heal service.
pub async fn disable(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let committed = toggle_heal(&state, &name, false).await?;
    info!(volume = %name, "self-heal disabled");
    Ok(Json(VolumeResp::from(&committed)))
}

async fn toggle_granular(
    state: &AppState,
    name: &str,
    enable: bool,
) -> Result<VolumeInfo, ApiError> {
    let services = &state.services;
    let mut volume = services.volumes.get(name).await?;
    check_heal_capable(&volume)?;

    volume.granular_heal_entry = enable;
    let helper_step = if enable { "granular-heal.Enable" } else { "granular-heal.Disable" };

    let mut txn = services.txn();
    let (lock, unlock) = create_lock_steps(name);
    txn.steps = vec![
        lock,
        Step::new(helper_step, vec![]),
        Step::new("vol-option.UpdateVolinfo", vec![]),
        unlock,
    ];
    txn.ctx.set(CTX_VOLINFO, &volume)?;
    txn.ctx.set(CTX_VOLNAME, &name)?;

    let result = txn.run().await;
    txn.cleanup().await;
    result?;

    Ok(txn.ctx.get(CTX_VOLINFO)?)
}

/// `POST /v1/volumes/{name}/heal/granular-entry/enable` - Enable
/// granular entry heal.
pub async fn granular_enable(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let committed = toggle_granular(&state, &name, true).await?;
    info!(volume = %name, "granular entry heal enabled");
    Ok(Json(VolumeResp::from(&committed)))
}

/// `POST /v1/volumes/{name}/heal/granular-entry/disable` - Disable
/// granular entry heal.
pub async fn granular_disable(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let committed = toggle_granular(&state, &name, false).await?;
    info!(volume = %name, "granular entry heal disabled");
    Ok(Json(VolumeResp::from(&committed)))
}

async fn heal_info(state: &AppState, name: &str, opts: Option<String>) -> CoreResult<HealInfoResp> {
    let services = &state.services;
    let volume = services.volumes.get(name).await?;
    if !volume.ty.is_heal_capable() {
        return Err(volgrid_core::Error::op_with_resource(
            ErrorCode::InvalidArgument,
            format!("volume type {} does not support self-heal", volume.ty),
            name,
        ));
    }

    let mut args = Vec::new();
    if let Some(opts) = opts {
        args.push(opts);
    }
    args.push("xml".to_string());

    let raw = services.heal.run(name, &args).await?;
    let bricks = parse_heal_info(&raw)?;
    Ok(HealInfoResp { bricks })
}

/// `GET /v1/volumes/{name}/heal-info` - Per-brick heal counters.
pub async fn info(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = heal_info(&state, &name, None).await?;
    Ok(Json(resp))
}

/// `GET /v1/volumes/{name}/{opts}/heal-info` - Per-brick heal counters
/// with helper options.
pub async fn info_with_opts(
    State(state): State<AppState>,
    Path((name, opts)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = heal_info(&state, &name, Some(opts)).await?;
    Ok(Json(resp))
}
