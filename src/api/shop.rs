//! Merchant purchases and equipment repair (SPEC_FULL.md §4.7): the two
//! places a player's gold moves. Both reserve against [`GoldLedger`] before
//! touching the external ledger, so a slow mint never lets the same gold be
//! spent twice.

use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;
use warp::{Filter, Rejection, Reply};

use crate::entity::{EntityKind, EquipSlot};
use crate::error::ShardError;
use crate::ids::{EntityId, TokenId, ZoneId};
use crate::ledger::LedgerOp;
use crate::world::World;
use crate::zone::dispatcher::check_ownership;

use super::{with_wallet, with_world};

pub fn routes(world: Arc<World>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    buy(world.clone()).or(repair(world))
}

#[derive(Deserialize)]
struct BuyRequest {
    zone_id: String,
    entity_id: EntityId,
    token_id: u64,
    qty: u32,
    unit_price: u64,
}

fn buy(world: Arc<World>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("shop" / "buy")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_wallet(world.clone()))
        .and(with_world(world))
        .and_then(|req: BuyRequest, wallet, world: Arc<World>| async move {
            let zone_id = ZoneId::new(req.zone_id);
            check_ownership(&world.zones, &zone_id, req.entity_id, &wallet)
                .await
                .map_err(warp::reject::custom)?;

            let total_cost = req.unit_price.saturating_mul(req.qty as u64);
            let on_chain_gold = world
                .asset_ledger
                .gold_balance(&wallet)
                .await
                .map_err(|e| warp::reject::custom(ShardError::LedgerUnavailable(e.to_string())))?;
            world
                .gold_ledger
                .reserve(&wallet, total_cost, on_chain_gold)
                .map_err(|reason| warp::reject::custom(ShardError::precondition(reason)))?;

            let token_id = TokenId(req.token_id);
            let burn_result = world
                .ledger
                .submit(LedgerOp::BurnGold {
                    wallet: wallet.clone(),
                    amount: total_cost,
                })
                .await;
            world.gold_ledger.unreserve(&wallet, total_cost);
            if let Err(err) = burn_result {
                warn!(%err, "shop purchase failed paying gold");
                return Err(warp::reject::custom(ShardError::LedgerUnavailable(err.to_string())));
            }
            world.gold_ledger.record_spend(&wallet, total_cost);

            if let Err(err) = world
                .ledger
                .submit(LedgerOp::MintItem {
                    wallet: wallet.clone(),
                    token: token_id,
                    qty: req.qty,
                })
                .await
            {
                // Gold is already spent; the mint failure is logged and left
                // for manual reconciliation rather than refunded, matching
                // SPEC_FULL.md §9A's "mint failures logged, not escalated".
                warn!(%err, "shop item mint failed after gold was already spent");
                return Err(warp::reject::custom(ShardError::LedgerUnavailable(err.to_string())));
            }

            Ok::<_, Rejection>(warp::reply::json(&serde_json::json!({"spent": total_cost})))
        })
}

#[derive(Deserialize)]
struct RepairRequest {
    zone_id: String,
    entity_id: EntityId,
}

/// `(copperPrice / maxDurability) × missingDurability × (1 + playerLevel × 0.04)`
/// (SPEC_FULL.md §6). Computed entirely from the item's own fields and the
/// player's level — never from anything the client sends.
fn repair_cost(copper_price: u64, max_durability: u32, missing_durability: u32, player_level: u32) -> u64 {
    if max_durability == 0 {
        return 0;
    }
    let per_point = copper_price as f64 / max_durability as f64;
    let level_factor = 1.0 + player_level as f64 * 0.04;
    (per_point * missing_durability as f64 * level_factor).round() as u64
}

fn repair(world: Arc<World>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("equipment" / "repair")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_wallet(world.clone()))
        .and(with_world(world))
        .and_then(|req: RepairRequest, wallet, world: Arc<World>| async move {
            let zone_id = ZoneId::new(req.zone_id);
            check_ownership(&world.zones, &zone_id, req.entity_id, &wallet)
                .await
                .map_err(warp::reject::custom)?;

            // Quote the repair server-side across every damaged slot before
            // touching gold; a client-supplied cost/slot would let a player
            // repair for free or skip slots the quote was meant to cover.
            let total_cost: u64 = world
                .zones
                .with_zone_mut(&zone_id, false, |state| {
                    let entity = state.entities.get(&req.entity_id)?;
                    let EntityKind::Player(p) = &entity.kind else { return None };
                    let level = p.level;
                    Some(
                        p.equipment
                            .values()
                            .filter(|item| item.durability < item.max_durability)
                            .map(|item| {
                                let missing = item.max_durability - item.durability;
                                repair_cost(item.copper_price, item.max_durability, missing, level)
                            })
                            .sum(),
                    )
                })
                .await
                .flatten()
                .ok_or_else(|| ShardError::precondition("entity not found"))
                .map_err(warp::reject::custom)?;

            if total_cost > 0 {
                let on_chain_gold = world
                    .asset_ledger
                    .gold_balance(&wallet)
                    .await
                    .map_err(|e| warp::reject::custom(ShardError::LedgerUnavailable(e.to_string())))?;
                world
                    .gold_ledger
                    .reserve(&wallet, total_cost, on_chain_gold)
                    .map_err(|reason| warp::reject::custom(ShardError::precondition(reason)))?;

                let burn = world
                    .ledger
                    .submit(LedgerOp::BurnGold { wallet: wallet.clone(), amount: total_cost })
                    .await;
                world.gold_ledger.unreserve(&wallet, total_cost);
                if let Err(err) = burn {
                    return Err(warp::reject::custom(ShardError::LedgerUnavailable(err.to_string())));
                }
                world.gold_ledger.record_spend(&wallet, total_cost);
            }

            world
                .zones
                .with_zone_mut(&zone_id, false, |state| {
                    if let Some(entity) = state.entities.get_mut(&req.entity_id) {
                        if let EntityKind::Player(p) = &mut entity.kind {
                            for item in p.equipment.values_mut() {
                                item.durability = item.max_durability;
                                item.broken = false;
                            }
                        }
                    }
                })
                .await;

            Ok::<_, Rejection>(warp::reply::json(&serde_json::json!({"repaired": true, "cost": total_cost})))
        })
}
