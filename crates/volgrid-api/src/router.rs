//! REST router configuration.

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{heal, internal, peers, volumes};
use crate::state::AppState;

/// Builds the daemon's router: the `/v1` client surface plus the
/// internal peer endpoints.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/volumes", post(volumes::create).get(volumes::list))
        .route("/v1/volumes/{name}", get(volumes::get).delete(volumes::delete))
        .route("/v1/volumes/{name}/expand", post(volumes::expand))
        .route("/v1/volumes/{name}/start", post(volumes::start))
        .route("/v1/volumes/{name}/stop", post(volumes::stop))
        .route("/v1/volumes/{name}/status", get(volumes::status))
        .route("/v1/volumes/{name}/heal/enable", post(heal::enable))
        .route("/v1/volumes/{name}/heal/disable", post(heal::disable))
        .route(
            "/v1/volumes/{name}/heal/granular-entry/enable",
            post(heal::granular_enable),
        )
        .route(
            "/v1/volumes/{name}/heal/granular-entry/disable",
            post(heal::granular_disable),
        )
        .route("/v1/volumes/{name}/heal-info", get(heal::info))
        .route("/v1/volumes/{name}/{opts}/heal-info", get(heal::info_with_opts))
        .route("/v1/peers", get(peers::list))
        .route("/v1/peers/{peerid}", get(peers::get).delete(peers::delete))
        .route("/internal/txn/step", post(internal::run_step))
        .route("/internal/cluster/leave", post(internal::leave))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
