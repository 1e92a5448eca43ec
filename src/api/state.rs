//! Read-only zone state endpoints (SPEC_FULL.md §6): snapshots and the event
//! feed. Both require a valid session so an anonymous caller can't scrape
//! the world.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use warp::{Filter, Rejection, Reply};

use crate::error::ShardError;
use crate::ids::ZoneId;
use crate::world::World;

use super::{with_wallet, with_world};

pub fn routes(world: Arc<World>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    all_zones(world.clone()).or(snapshot(world.clone())).or(events(world))
}

/// `GET /state`: every zone's snapshot keyed by zone id, for tool-servers
/// that want the whole world rather than polling zone-by-zone.
fn all_zones(world: Arc<World>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("state")
        .and(warp::get())
        .and(with_wallet(world.clone()))
        .and(with_world(world))
        .and_then(|_wallet, world: Arc<World>| async move {
            let mut zones = HashMap::new();
            for zone_id in world.zones.zone_ids() {
                if let Some(snap) = world.zones.snapshot(&zone_id).await {
                    zones.insert(zone_id.0, snap);
                }
            }
            Ok::<_, Rejection>(warp::reply::json(&serde_json::json!({"zones": zones})))
        })
}

fn snapshot(world: Arc<World>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("zones" / String)
        .and(warp::get())
        .and(with_wallet(world.clone()))
        .and(with_world(world))
        .and_then(|zone_id: String, _wallet, world: Arc<World>| async move {
            let zone_id = ZoneId::new(zone_id);
            world
                .zones
                .snapshot(&zone_id)
                .await
                .map(|snap| warp::reply::json(&snap))
                .ok_or_else(|| warp::reject::custom(ShardError::precondition("zone not found")))
        })
}

#[derive(Deserialize)]
struct EventsQuery {
    since: Option<i64>,
    limit: Option<usize>,
}

fn events(world: Arc<World>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("events" / String)
        .and(warp::get())
        .and(warp::query::<EventsQuery>())
        .and(with_wallet(world.clone()))
        .and(with_world(world))
        .and_then(|zone_id: String, query: EventsQuery, _wallet, world: Arc<World>| async move {
            let zone_id = ZoneId::new(zone_id);
            world
                .zones
                .events(&zone_id, query.since, query.limit)
                .map(|events| warp::reply::json(&events))
                .ok_or_else(|| warp::reject::custom(ShardError::precondition("zone not found")))
        })
}
