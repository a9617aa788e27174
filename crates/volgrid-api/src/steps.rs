//! Transaction step functions for the volume and self-heal workflows.
//!
//! Registered into the step registry at process start, before the first
//! request is served. Step names are the wire identifiers used for peer
//! dispatch.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;
use volgrid_cluster::{BrickSupervisor, HealReporter};
use volgrid_core::types::{BrickInfo, VolState, VolumeInfo};
use volgrid_core::{Error, ErrorCode, Result};
use volgrid_store::{StoreBackend, Volumes, TXN_PREFIX};
use volgrid_txn::{Registry, TxnCtx};

/// Context slot holding the volume being worked on.
pub const CTX_VOLINFO: &str = "volinfo";
/// Context slot holding the bricks added by an expand.
pub const CTX_NEW_BRICKS: &str = "new-bricks";
/// Context slot holding the state a start/stop commits.
pub const CTX_TARGET_STATE: &str = "target-state";
/// Context slot holding the volume name for heal helper steps.
pub const CTX_VOLNAME: &str = "volname";
/// Context slot relaxing local brick-directory checks.
pub const CTX_FORCE: &str = "force";

/// Node-result key prefix for per-brick runtime status.
pub const RESULT_BRICK_STATUS: &str = "brick-status";
/// Node-result key for heal helper output.
pub const RESULT_HEAL_OUTPUT: &str = "heal-output";

const BRICK_PATH_MAX: usize = 4096;
const BRICK_COMPONENT_MAX: usize = 255;

/// Dependencies captured by the registered step handlers.
#[derive(Clone)]
pub struct StepDeps {
    /// This node's identity.
    pub node_id: Uuid,
    /// The replicated store.
    pub store: Arc<dyn StoreBackend>,
    /// Volume accessors.
    pub volumes: Volumes,
    /// Data-plane daemon supervisor.
    pub supervisor: Arc<dyn BrickSupervisor>,
    /// Heal helper seam.
    pub heal: Arc<dyn HealReporter>,
}

/// Registers every workflow step function.
pub fn register_steps(registry: &Registry, deps: &StepDeps) {
    register_volume_steps(registry, deps);
    register_selfheal_steps(registry, deps);
}

fn validate_brick_path(path: &str) -> Result<()> {
    if !Path::new(path).is_absolute() {
        return Err(Error::invalid_argument(format!("brick path {path:?} is not absolute")));
    }
    if path.len() > BRICK_PATH_MAX {
        return Err(Error::invalid_argument(format!(
            "brick path exceeds {BRICK_PATH_MAX} bytes"
        )));
    }
    if path.split('/').any(|c| c.len() > BRICK_COMPONENT_MAX) {
        return Err(Error::invalid_argument(format!(
            "brick path component exceeds {BRICK_COMPONENT_MAX} bytes"
        )));
    }
    Ok(())
}

fn reservation_key(txn_id: Uuid, node: Uuid, path: &str) -> String {
    format!("{TXN_PREFIX}{txn_id}/reserved/{node}:{path}")
}

/// Validates the bricks of this node and reserves their paths for the
/// duration of the transaction.
///
/// A reservation under `txn/<id>/reserved/` closes the race between two
/// transactions provisioning the same `(node, path)` under different
/// volume locks; the rollback step and the transaction cleanup both
/// remove it.
async fn validate_local_bricks(
    deps: &StepDeps,
    ctx: &TxnCtx,
    volume_name: &str,
    bricks: &[BrickInfo],
    force: bool,
) -> Result<()> {
    for brick in bricks.iter().filter(|b| b.node_id == deps.node_id) {
        validate_brick_path(&brick.path)?;

        if !force {
            let parent = Path::new(&brick.path)
                .parent()
                .ok_or_else(|| Error::invalid_argument("brick path has no parent directory"))?;
            match tokio::fs::metadata(parent).await {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    return Err(Error::invalid_argument(format!(
                        "brick parent {} is not a directory",
                        parent.display()
                    )));
                }
                Err(_) => {
                    return Err(Error::invalid_argument(format!(
                        "brick parent {} does not exist",
                        parent.display()
                    )));
                }
            }
        }

        if let Some(owner) = deps
            .volumes
            .brick_path_owner(brick.node_id, &brick.path, Some(volume_name))
            .await?
        {
            return Err(Error::op_with_resource(
                ErrorCode::Conflict,
                format!("brick {} is already in use by volume {owner}", brick.path),
                owner,
            ));
        }

        // Cross-transaction reservation check. Volume locks only
        // serialize same-name transactions; brick paths are contended
        // cluster-wide.
        let own_prefix = format!("{TXN_PREFIX}{}/", ctx.txn_id());
        let suffix = format!("/reserved/{}:{}", brick.node_id, brick.path);
        for (key, _) in deps.store.get_prefix(TXN_PREFIX).await? {
            if key.ends_with(&suffix) && !key.starts_with(&own_prefix) {
                return Err(Error::conflict(format!(
                    "brick {} is reserved by another transaction",
                    brick.path
                )));
            }
        }

        let key = reservation_key(ctx.txn_id(), brick.node_id, &brick.path);
        deps.store.put(&key, volume_name.as_bytes().to_vec()).await?;
        debug!(brick = %brick.path, volume = %volume_name, "reserved brick path");
    }
    Ok(())
}

/// Removes the reservations stamped by this transaction's validate step.
async fn release_reservations(deps: &StepDeps, ctx: &TxnCtx) -> Result<()> {
    let prefix = format!("{TXN_PREFIX}{}/reserved/", ctx.txn_id());
    deps.store.delete_prefix(&prefix).await
}

fn local_bricks(volume: &VolumeInfo, node_id: Uuid) -> Vec<BrickInfo> {
    volume.bricks().filter(|b| b.node_id == node_id).cloned().collect()
}

fn register_volume_steps(registry: &Registry, deps: &StepDeps) {
    let d = deps.clone();
    registry.register("vol-create.Validate", move |ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move {
            let volinfo: VolumeInfo = ctx.get(CTX_VOLINFO)?;
            let force: bool = ctx.get(CTX_FORCE).unwrap_or(false);
            let bricks: Vec<BrickInfo> = volinfo.bricks().cloned().collect();
            validate_local_bricks(&d, &ctx, &volinfo.name, &bricks, force).await
        }
    });

    let d = deps.clone();
    registry.register("vol-create.Rollback", move |ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move { release_reservations(&d, &ctx).await }
    });

    let d = deps.clone();
    registry.register("vol-create.StoreVolume", move |ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move {
            let mut volinfo: VolumeInfo = ctx.get(CTX_VOLINFO)?;
            // The handler's existence check ran before the lock; recheck
            // under it so concurrent same-name creates serialize to one
            // winner.
            if d.volumes.exists(&volinfo.name).await? {
                return Err(Error::op_with_resource(
                    ErrorCode::Conflict,
                    format!("volume {} already exists", volinfo.name),
                    volinfo.name.clone(),
                ));
            }
            volinfo.validate()?;
            volinfo.bump_version()?;
            d.volumes.upsert(&volinfo).await?;
            info!(volume = %volinfo.name, version = volinfo.version, "stored new volume");
            ctx.set(CTX_VOLINFO, &volinfo)
        }
    });

    let d = deps.clone();
    registry.register("vol-expand.Validate", move |ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move {
            let volinfo: VolumeInfo = ctx.get(CTX_VOLINFO)?;
            let force: bool = ctx.get(CTX_FORCE).unwrap_or(false);
            let new_bricks: Vec<BrickInfo> = ctx.get(CTX_NEW_BRICKS)?;
            validate_local_bricks(&d, &ctx, &volinfo.name, &new_bricks, force).await
        }
    });

    let d = deps.clone();
    registry.register("vol-expand.Rollback", move |ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move { release_reservations(&d, &ctx).await }
    });

    let d = deps.clone();
    registry.register("vol-expand.StoreVolume", move |ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move {
            let mut volinfo: VolumeInfo = ctx.get(CTX_VOLINFO)?;
            volinfo.validate()?;
            volinfo.bump_version()?;
            d.volumes.upsert(&volinfo).await?;
            info!(volume = %volinfo.name, dist_count = volinfo.dist_count, "expanded volume");
            ctx.set(CTX_VOLINFO, &volinfo)
        }
    });

    let d = deps.clone();
    registry.register("vol-start.StartBricks", move |ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move {
            let volinfo: VolumeInfo = ctx.get(CTX_VOLINFO)?;
            let bricks = local_bricks(&volinfo, d.node_id);
            for brick in &bricks {
                d.supervisor.start_brick(brick, &volinfo).await?;
            }
            ctx.set_node_result(d.node_id, "started-bricks", &(bricks.len() as u32))
        }
    });

    let d = deps.clone();
    registry.register("vol-start.UndoStartBricks", move |ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move {
            let volinfo: VolumeInfo = ctx.get(CTX_VOLINFO)?;
            for brick in local_bricks(&volinfo, d.node_id) {
                d.supervisor.stop_brick(&brick).await?;
            }
            Ok(())
        }
    });

    let d = deps.clone();
    registry.register("vol-stop.StopBricks", move |ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move {
            let volinfo: VolumeInfo = ctx.get(CTX_VOLINFO)?;
            let bricks = local_bricks(&volinfo, d.node_id);
            for brick in &bricks {
                d.supervisor.stop_brick(brick).await?;
            }
            ctx.set_node_result(d.node_id, "stopped-bricks", &(bricks.len() as u32))
        }
    });

    let d = deps.clone();
    registry.register("vol-stop.UndoStopBricks", move |ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move {
            let volinfo: VolumeInfo = ctx.get(CTX_VOLINFO)?;
            for brick in local_bricks(&volinfo, d.node_id) {
                d.supervisor.start_brick(&brick, &volinfo).await?;
            }
            Ok(())
        }
    });

    let d = deps.clone();
    registry.register("vol-state.UpdateVolinfo", move |ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move {
            let mut volinfo: VolumeInfo = ctx.get(CTX_VOLINFO)?;
            let target: VolState = ctx.get(CTX_TARGET_STATE)?;
            volinfo.state = target;
            volinfo.bump_version()?;
            d.volumes.upsert(&volinfo).await?;
            info!(volume = %volinfo.name, state = %volinfo.state, "committed state change");
            ctx.set(CTX_VOLINFO, &volinfo)
        }
    });

    let d = deps.clone();
    registry.register("vol-option.UpdateVolinfo", move |ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move {
            let mut volinfo: VolumeInfo = ctx.get(CTX_VOLINFO)?;
            volinfo.bump_version()?;
            d.volumes.upsert(&volinfo).await?;
            ctx.set(CTX_VOLINFO, &volinfo)
        }
    });

    let d = deps.clone();
    registry.register("vol-delete.Commit", move |ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move {
            let volinfo: VolumeInfo = ctx.get(CTX_VOLINFO)?;
            d.volumes.delete(&volinfo.name).await?;
            info!(volume = %volinfo.name, "deleted volume");
            Ok(())
        }
    });

    let d = deps.clone();
    registry.register("vol-status.Check", move |ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move {
            let volinfo: VolumeInfo = ctx.get(CTX_VOLINFO)?;
            for brick in local_bricks(&volinfo, d.node_id) {
                let status = d.supervisor.brick_status(&brick).await?;
                ctx.set_node_result(
                    d.node_id,
                    &format!("{RESULT_BRICK_STATUS}/{}", brick.id),
                    &status,
                )?;
            }
            Ok(())
        }
    });
}

fn register_selfheal_steps(registry: &Registry, deps: &StepDeps) {
    let d = deps.clone();
    registry.register("selfheal-start.Commit", move |_ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move { d.supervisor.start_selfheal().await }
    });

    let d = deps.clone();
    registry.register("selfheal-stop.Commit", move |_ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move {
            // The daemon keeps running while any replicate or disperse
            // volume is started.
            if d.volumes.replicate_volumes_quiesced().await? {
                d.supervisor.stop_selfheal().await
            } else {
                debug!("replicate volumes still started; leaving self-heal daemon running");
                Ok(())
            }
        }
    });

    let d = deps.clone();
    registry.register("granular-heal.Enable", move |ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move {
            let volname: String = ctx.get(CTX_VOLNAME)?;
            let args = vec!["granular-entry-heal-op".to_string(), "enable".to_string()];
            let output = d.heal.run(&volname, &args).await?;
            ctx.set_node_result(d.node_id, RESULT_HEAL_OUTPUT, &output)
        }
    });

    let d = deps.clone();
    registry.register("granular-heal.Disable", move |ctx: Arc<TxnCtx>| {
        let d = d.clone();
        async move {
            let volname: String = ctx.get(CTX_VOLNAME)?;
            let args = vec!["granular-entry-heal-op".to_string(), "disable".to_string()];
            let output = d.heal.run(&volname, &args).await?;
            ctx.set_node_result(d.node_id, RESULT_HEAL_OUTPUT, &output)
        }
    });
}
