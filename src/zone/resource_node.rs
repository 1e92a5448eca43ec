//! Resource nodes: gather orders and charge/respawn lifecycle
//! (SPEC_FULL.md §4.5).

use crate::config::ShardConfig;
use crate::entity::{EntityKind, Order};
use crate::ids::EntityId;
use crate::ledger::LedgerOp;
use tracing::warn;

use super::event_log::EventType;
use super::{ZoneContext, ZoneState};

/// Resolves every outstanding `gather` order whose node is in range, has
/// charges left, and whose gatherer carries a tool of sufficient tier.
/// Nodes with zero remaining charges are left alone here; they're reset by
/// [`tick_respawns`] once their respawn delay elapses.
pub fn resolve_gather_orders(state: &mut ZoneState, config: &ShardConfig, ctx: &ZoneContext) {
    let attempts: Vec<(EntityId, EntityId)> = state
        .entities
        .values()
        .filter_map(|e| match e.order() {
            Some(Order::Gather { node }) if e.is_alive() => Some((e.id, *node)),
            _ => None,
        })
        .collect();

    for (gatherer_id, node_id) in attempts {
        let Some(gatherer) = state.entities.get(&gatherer_id) else { continue };
        let Some(node_entity) = state.entities.get(&node_id) else {
            clear_order(state, gatherer_id);
            continue;
        };
        if gatherer.position.distance(node_entity.position) > config.gather_range {
            continue;
        }
        let EntityKind::ResourceNode(node) = &node_entity.kind else {
            clear_order(state, gatherer_id);
            continue;
        };
        if node.charges == 0 {
            clear_order(state, gatherer_id);
            continue;
        }

        let tool_tier = gatherer_tool_tier(gatherer);
        if tool_tier < node.required_tool_tier {
            clear_order(state, gatherer_id);
            state.log(
                EventType::System,
                format!("{gatherer_id} lacks the tool tier to gather {node_id}"),
                Some(gatherer_id),
                Some(node_id),
                serde_json::json!({}),
            );
            continue;
        }

        let (yield_token, qty, profession_xp, resource_type, depleted) = {
            let node_entity = state.entities.get_mut(&node_id).unwrap();
            let EntityKind::ResourceNode(node) = &mut node_entity.kind else { unreachable!() };
            let qty = if node.yield_max > node.yield_min {
                rand::Rng::gen_range(&mut state.rng, node.yield_min..=node.yield_max)
            } else {
                node.yield_min
            };
            node.charges -= 1;
            let depleted = node.charges == 0;
            if depleted {
                node.depleted_at_tick = Some(state.tick);
            }
            (node.yield_token_id, qty, node.profession_xp, node.resource_type, depleted)
        };

        clear_order(state, gatherer_id);
        award_gather(state, gatherer_id, yield_token, qty, profession_xp, ctx);
        state.log(
            EventType::Gather,
            format!("{gatherer_id} gathered {node_id}"),
            Some(gatherer_id),
            Some(node_id),
            serde_json::json!({"resource_type": format!("{resource_type:?}"), "qty": qty, "depleted": depleted}),
        );
    }
}

fn gatherer_tool_tier(entity: &crate::entity::Entity) -> u32 {
    let EntityKind::Player(p) = &entity.kind else { return 0 };
    p.equipment
        .get(&crate::entity::EquipSlot::Weapon)
        .filter(|item| !item.broken)
        .map(|item| item.tool_tier)
        .unwrap_or(0)
}

fn clear_order(state: &mut ZoneState, entity_id: EntityId) {
    if let Some(entity) = state.entities.get_mut(&entity_id) {
        entity.set_order(None);
    }
}

fn award_gather(
    state: &ZoneState,
    gatherer_id: EntityId,
    token_id: crate::ids::TokenId,
    qty: u32,
    _profession_xp: u64,
    ctx: &ZoneContext,
) {
    let Some(entity) = state.entities.get(&gatherer_id) else { return };
    let EntityKind::Player(player) = &entity.kind else { return };
    let wallet = player.wallet.clone();
    ctx.ledger.submit_detached(
        LedgerOp::MintItem { wallet, token: token_id, qty },
        |result| {
            if let Err(err) = result {
                warn!(%err, "gather mint failed");
            }
        },
    );
}

/// Resets any node whose `respawn_ticks` have elapsed since it hit zero
/// charges back to full.
pub fn tick_respawns(state: &mut ZoneState) {
    let current_tick = state.tick;
    for entity in state.entities.values_mut() {
        if let EntityKind::ResourceNode(node) = &mut entity.kind {
            if let Some(depleted_at) = node.depleted_at_tick {
                if current_tick.saturating_sub(depleted_at) >= node.respawn_ticks {
                    node.charges = node.max_charges;
                    node.depleted_at_tick = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, ResourceNodeState, ResourceType};
    use crate::ids::TokenId;

    fn make_node(charges: u32, depleted_at: Option<u64>) -> Entity {
        Entity {
            id: EntityId::new(),
            name: "vein".into(),
            position: crate::math::Vec2::ZERO,
            kind: EntityKind::ResourceNode(ResourceNodeState {
                resource_type: ResourceType::Ore,
                charges,
                max_charges: 3,
                depleted_at_tick: depleted_at,
                respawn_ticks: 10,
                required_tool_tier: 0,
                yield_token_id: TokenId(1),
                yield_min: 1,
                yield_max: 1,
                profession_xp: 5,
            }),
        }
    }

    #[test]
    fn node_resets_once_respawn_delay_elapses() {
        let mut state = ZoneState::new(crate::ids::ZoneId::new("z"), 10, false);
        state.tick = 20;
        let node = make_node(0, Some(5));
        let node_id = node.id;
        state.entities.insert(node_id, node);

        tick_respawns(&mut state);
        let EntityKind::ResourceNode(node) = &state.entities.get(&node_id).unwrap().kind else { panic!() };
        assert_eq!(node.charges, 3);
        assert!(node.depleted_at_tick.is_none());
    }

    #[test]
    fn node_stays_depleted_before_delay_elapses() {
        let mut state = ZoneState::new(crate::ids::ZoneId::new("z"), 10, false);
        state.tick = 8;
        let node = make_node(0, Some(5));
        let node_id = node.id;
        state.entities.insert(node_id, node);

        tick_respawns(&mut state);
        let EntityKind::ResourceNode(node) = &state.entities.get(&node_id).unwrap().kind else { panic!() };
        assert_eq!(node.charges, 0);
    }
}
