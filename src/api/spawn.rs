//! `POST /spawn` (SPEC_FULL.md §6): creates a player entity for the calling
//! wallet. Character creation tables (race/class base stats) live outside
//! this shard's scope, so the caller supplies the starting numbers directly;
//! see DESIGN.md for the reasoning.

use std::sync::Arc;

use serde::Deserialize;
use warp::{Filter, Rejection, Reply};

use crate::entity::{Entity, EntityKind, PlayerState, Stats};
use crate::ids::ZoneId;
use crate::math::Vec2;
use crate::world::World;

use super::{with_wallet, with_world};

pub fn routes(world: Arc<World>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    spawn(world)
}

#[derive(Deserialize)]
struct SpawnRequest {
    zone_id: String,
    name: String,
    race_id: String,
    class_id: String,
    base_stats: Stats,
    #[serde(default)]
    position: Vec2,
}

fn spawn(world: Arc<World>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("spawn")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_wallet(world.clone()))
        .and(with_world(world))
        .and_then(|req: SpawnRequest, wallet, world: Arc<World>| async move {
            let zone_id = ZoneId::new(req.zone_id);
            let player = PlayerState::new(wallet, req.race_id, req.class_id, req.base_stats);
            let entity = Entity {
                id: crate::ids::EntityId::new(),
                name: req.name,
                position: req.position,
                kind: EntityKind::Player(Box::new(player)),
            };
            let entity_id = entity.id;
            world
                .zones
                .with_zone_mut(&zone_id, true, |state| {
                    state.entities.insert(entity_id, entity);
                })
                .await;
            Ok::<_, Rejection>(warp::reply::json(&serde_json::json!({"entityId": entity_id})))
        })
}
