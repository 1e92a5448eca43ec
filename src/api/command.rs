//! The single command-submission endpoint (SPEC_FULL.md §4.2 /§6): every
//! player intent — move, attack, gather, cast, use a portal, enter a gate —
//! funnels through here and into [`crate::zone::dispatcher::dispatch`].
//!
//! The per-verb routes below (`/move`, `/attack`, ...) are conveniences for
//! external tool-servers that would rather hit a stable path per verb than
//! build a tagged-union body; they dispatch through the exact same function.

use std::sync::Arc;

use serde::Deserialize;
use warp::{Filter, Rejection, Reply};

use crate::ids::{EntityId, WalletId, ZoneId};
use crate::math::Vec2;
use crate::world::World;
use crate::zone::dispatcher::{self, CommandAction};

use super::{with_wallet, with_world};

pub fn routes(world: Arc<World>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    generic(world.clone())
        .or(convenience(world.clone(), "move", |b: MoveBody| CommandAction::Move { target: b.target }))
        .or(convenience(world.clone(), "attack", |b: AttackBody| CommandAction::Attack { target: b.target }))
        .or(convenience(world.clone(), "gather", |b: GatherBody| CommandAction::Gather { node: b.node }))
        .or(convenience(world.clone(), "cast", |b: CastBody| CommandAction::Cast {
            technique_id: b.technique_id,
            target: b.target,
        }))
        .or(transition(world))
}

#[derive(Deserialize)]
struct CommandRequest {
    zone_id: String,
    entity_id: EntityId,
    #[serde(flatten)]
    action: CommandAction,
}

fn generic(world: Arc<World>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("command")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_wallet(world.clone()))
        .and(with_world(world))
        .and_then(|req: CommandRequest, wallet, world: Arc<World>| async move {
            let zone_id = ZoneId::new(req.zone_id);
            let result = dispatcher::dispatch(&world.zones, &world.config, &zone_id, req.entity_id, &wallet, req.action)
                .await
                .map_err(warp::reject::custom)?;
            Ok::<_, Rejection>(warp::reply::json(&result))
        })
}

/// Every per-verb convenience body shares `zone_id`/`entity_id`; the
/// verb-specific payload is supplied by `to_action`.
#[derive(Deserialize)]
struct VerbEnvelope<T> {
    zone_id: String,
    entity_id: EntityId,
    #[serde(flatten)]
    body: T,
}

#[derive(Deserialize)]
struct MoveBody {
    target: Vec2,
}

#[derive(Deserialize)]
struct AttackBody {
    target: EntityId,
}

#[derive(Deserialize)]
struct GatherBody {
    node: EntityId,
}

#[derive(Deserialize)]
struct CastBody {
    technique_id: String,
    target: Option<EntityId>,
}

fn convenience<T, F>(
    world: Arc<World>,
    verb: &'static str,
    to_action: F,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send + 'static,
    F: Fn(T) -> CommandAction + Clone + Send + Sync + 'static,
{
    warp::path(verb)
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_wallet(world.clone()))
        .and(with_world(world))
        .and_then(move |envelope: VerbEnvelope<T>, wallet: WalletId, world: Arc<World>| {
            let to_action = to_action.clone();
            async move {
                let zone_id = ZoneId::new(envelope.zone_id);
                let action = to_action(envelope.body);
                let result = dispatcher::dispatch(&world.zones, &world.config, &zone_id, envelope.entity_id, &wallet, action)
                    .await
                    .map_err(warp::reject::custom)?;
                Ok::<_, Rejection>(warp::reply::json(&result))
            }
        })
}

/// `POST /transition/:zoneId/portal/:portalId`: the dedicated route for
/// portal travel alongside the generic `use_portal` command action.
fn transition(world: Arc<World>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("transition" / String / "portal" / EntityId)
        .and(warp::post())
        .and(warp::body::json())
        .and(with_wallet(world.clone()))
        .and(with_world(world))
        .and_then(
            |zone_id: String, portal_id: EntityId, req: TransitionBody, wallet: WalletId, world: Arc<World>| async move {
                let zone_id = ZoneId::new(zone_id);
                let result = dispatcher::dispatch(
                    &world.zones,
                    &world.config,
                    &zone_id,
                    req.entity_id,
                    &wallet,
                    CommandAction::UsePortal { portal_id },
                )
                .await
                .map_err(warp::reject::custom)?;
                Ok::<_, Rejection>(warp::reply::json(&result))
            },
        )
}

#[derive(Deserialize)]
struct TransitionBody {
    entity_id: EntityId,
}
