//! The ordered tick algorithm (SPEC_FULL.md §4.1). Runs once per zone per
//! `tick_interval`, after the inbox has already been drained into the zone's
//! entity map by the caller.
//!
//! The teacher schedules a fixed sequence of ECS systems every tick
//! (`ScheduleRunnerPlugin`); with no ECS `World` behind this shard, the
//! equivalent is an explicit ordered function call per phase. Each phase is
//! wrapped in `catch_unwind` so one bad order or a single malformed entity
//! can't take down the whole zone loop — only an unwind escaping every phase
//! boundary (which should never happen) is treated as fatal by the caller.

use std::panic::{self, AssertUnwindSafe};

use crate::entity::{EntityKind, Order};
use crate::ids::EntityId;

use super::event_log::EventType;
use super::{combat, dungeon_gate, resource_node, technique};
use super::{ZoneContext, ZoneState};

/// SPEC_FULL.md §4.1's numbered sequence: expire effects, respawn resources,
/// expire corpses, resolve orders (move/attack/gather/cast), run mob AI,
/// resolve deaths, flush events, then advance the tick counter.
pub fn run_tick(state: &mut ZoneState, ctx: &ZoneContext) -> Result<(), String> {
    run_phase(state, "effects", |s| combat::tick_effects_and_cooldowns(s));
    run_phase(state, "resource_respawn", resource_node::tick_respawns);
    run_phase(state, "mob_respawn", tick_mob_respawns);
    run_phase(state, "corpse_expiry", expire_stale_corpses);
    run_phase(state, "recompute_stats", |s| combat::recompute_all_effective_stats(s));
    run_phase(state, "movement", |s| resolve_movement_orders(s, &ctx.config));
    run_phase(state, "combat", |s| combat::resolve_combat_orders(s, &ctx.config, ctx));
    run_phase(state, "gather", |s| resource_node::resolve_gather_orders(s, &ctx.config, ctx));
    run_phase(state, "cast", |s| technique::resolve_cast_orders(s, ctx));
    run_phase(state, "mob_ai", |s| combat::run_mob_ai(s, &ctx.config));
    run_phase(state, "gate_expiry", expire_stale_gates);
    run_phase(state, "instance_clear", dungeon_gate::check_instance_cleared);

    state.tick += 1;
    Ok(())
}

/// Runs `f` against `state`, catching a panic so it degrades to a logged
/// `system` event instead of killing the zone's tick task.
fn run_phase(state: &mut ZoneState, phase: &str, f: impl FnOnce(&mut ZoneState)) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| f(state)));
    if let Err(payload) = result {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_owned());
        state.log(
            EventType::System,
            format!("tick phase '{phase}' panicked: {message}"),
            None,
            None,
            serde_json::json!({"phase": phase}),
        );
    }
}

/// Steps every entity with a pending `move` order toward its target by at
/// most `move_speed` world units, clearing the order once arrived (within
/// `arrival_threshold`).
fn resolve_movement_orders(state: &mut ZoneState, config: &crate::config::ShardConfig) {
    let moves: Vec<(EntityId, crate::math::Vec2)> = state
        .entities
        .values()
        .filter_map(|e| match e.order() {
            Some(Order::Move { target }) if e.is_alive() => Some((e.id, *target)),
            _ => None,
        })
        .collect();

    for (entity_id, target) in moves {
        let Some(entity) = state.entities.get_mut(&entity_id) else { continue };
        let new_pos = entity.position.step_toward(target, config.move_speed);
        entity.position = new_pos;
        if new_pos.distance(target) <= config.arrival_threshold {
            entity.set_order(None);
        }
    }
}

/// Instantiates queued mob respawns whose delay has elapsed.
fn tick_mob_respawns(state: &mut ZoneState) {
    let current_tick = state.tick;
    let (ready, pending): (Vec<_>, Vec<_>) = state
        .mob_respawns
        .drain(..)
        .partition(|(at_tick, _)| current_tick >= *at_tick);
    state.mob_respawns = pending;
    for (_, template) in ready {
        let entity = crate::entity::Entity {
            id: EntityId::new(),
            name: template.name.clone(),
            position: template.position,
            kind: EntityKind::Mob(Box::new(template.instantiate())),
        };
        state.log(
            EventType::System,
            format!("{} respawned", entity.name),
            None,
            Some(entity.id),
            serde_json::json!({}),
        );
        state.entities.insert(entity.id, entity);
    }
}

/// Fades any unopened gate whose lifetime has elapsed.
fn expire_stale_gates(state: &mut ZoneState) {
    let now = crate::config::chrono_like::now_millis();
    let expired: Vec<EntityId> = state
        .entities
        .iter()
        .filter_map(|(id, e)| match &e.kind {
            EntityKind::DungeonGate(g) if !g.gate_opened && now > g.gate_expires_at_ms => Some(*id),
            _ => None,
        })
        .collect();
    for id in expired {
        state.entities.remove(&id);
        state.log(EventType::GateFaded, "an unopened gate faded away", None, Some(id), serde_json::json!({}));
    }
}

/// Removes corpses whose skinning window has closed.
fn expire_stale_corpses(state: &mut ZoneState) {
    let now = crate::config::chrono_like::now_millis();
    let expired: Vec<EntityId> = state
        .entities
        .iter()
        .filter_map(|(id, e)| match &e.kind {
            EntityKind::Corpse(c) if now > c.skinnable_until_ms => Some(*id),
            _ => None,
        })
        .collect();
    for id in expired {
        state.entities.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ZoneId;
    use crate::ledger::{MockAssetLedger, TransactionSerializer};
    use std::sync::Arc;

    fn make_ctx() -> ZoneContext {
        let config = Arc::new(crate::config::test_config());
        let adapter = Arc::new(MockAssetLedger::new());
        let ledger = TransactionSerializer::spawn(adapter, config.ledger_max_retries);
        ZoneContext {
            config,
            gold_ledger: Arc::new(crate::ledger::GoldLedger::new()),
            ledger,
        }
    }

    #[tokio::test]
    async fn tick_increments_counter() {
        let mut state = ZoneState::new(ZoneId::new("t"), 10, false);
        let ctx = make_ctx();
        run_tick(&mut state, &ctx).unwrap();
        assert_eq!(state.tick, 1);
    }
}
