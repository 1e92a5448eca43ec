//! The HTTP API surface (SPEC_FULL.md §6): a `warp` filter tree sharing one
//! [`World`] across every route, grounded on the pack's blockchain-node
//! example (`r3e-network-neo-rs`) rather than the teacher, which speaks its
//! own binary protocol instead of JSON-over-HTTP.

pub mod auth;
pub mod command;
pub mod shop;
pub mod spawn;
pub mod state;

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use warp::{Filter, Rejection, Reply};

use crate::error::{handle_rejection, ShardError};
use crate::ids::WalletId;
use crate::world::World;

pub fn routes(world: Arc<World>) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    healthz(world.clone())
        .or(auth::routes(world.clone()))
        .or(state::routes(world.clone()))
        .or(command::routes(world.clone()))
        .or(spawn::routes(world.clone()))
        .or(shop::routes(world))
        .recover(handle_rejection)
}

/// Process liveness plus each live zone's current tick, so an ops dashboard
/// can tell a stalled zone task from a genuinely dead process.
fn healthz(world: Arc<World>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("healthz").and(warp::get()).and(with_world(world)).and_then(|world: Arc<World>| async move {
        let mut zone_ticks = HashMap::new();
        for zone_id in world.zones.zone_ids() {
            if let Some(snap) = world.zones.snapshot(&zone_id).await {
                zone_ticks.insert(zone_id.0, snap.tick);
            }
        }
        Ok::<_, Rejection>(warp::reply::json(&serde_json::json!({
            "status": "ok",
            "zones": zone_ticks,
        })))
    })
}

pub(crate) fn with_world(world: Arc<World>) -> impl Filter<Extract = (Arc<World>,), Error = Infallible> + Clone {
    warp::any().map(move || world.clone())
}

/// Extracts and resolves the bearer token from `Authorization: Bearer <token>`
/// into the wallet that owns the session, rejecting otherwise.
pub(crate) fn with_wallet(world: Arc<World>) -> impl Filter<Extract = (WalletId,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and(with_world(world)).and_then(
        |header: Option<String>, world: Arc<World>| async move {
            let token = header
                .and_then(|h| h.strip_prefix("Bearer ").map(str::to_owned))
                .ok_or_else(|| warp::reject::custom(ShardError::Unauthorized("missing bearer token".into())))?;
            world
                .sessions
                .resolve(&token)
                .map_err(|e| warp::reject::custom(ShardError::Unauthorized(e.to_string())))
        },
    )
}
