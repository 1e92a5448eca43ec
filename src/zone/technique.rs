//! Technique casting (SPEC_FULL.md §4.1 step 4, §4.3): resolves a pending
//! `cast` order against the caster's known techniques, cooldowns, and
//! essence, then applies the technique's effect (damage, heal, buff, or
//! shield).
//!
//! A fixed in-process registry stands in for the teacher's "by world
//! register" lookup of NPC capabilities: there is no trainer/learning flow
//! in scope, so every technique a player can ever cast is known from the
//! moment the registry is compiled.

use crate::entity::{Effect, EffectKind, EntityKind, Order, Stats};
use crate::ids::EntityId;

use super::event_log::EventType;
use super::{combat, ZoneContext, ZoneState};

#[derive(Debug, Clone, Copy)]
pub enum TechniqueEffect {
    /// Damage scaled by the caster's strength, mitigated by the target's
    /// defense the same way a melee attack is.
    Damage { power: f64 },
    Heal { amount: u32 },
    Shield { shield_hp: u32, duration_ticks: u32 },
    Buff { stat_modifiers: Stats, duration_ticks: u32 },
    /// Grants an `XpBoost` effect (SPEC_FULL.md's "XP tonic").
    XpBoost { multiplier: f64, duration_ticks: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct TechniqueDef {
    pub id: &'static str,
    pub essence_cost: u32,
    pub cooldown_ticks: u32,
    pub requires_target: bool,
    pub effect: TechniqueEffect,
}

const REGISTRY: &[TechniqueDef] = &[
    TechniqueDef {
        id: "fireball",
        essence_cost: 15,
        cooldown_ticks: 6,
        requires_target: true,
        effect: TechniqueEffect::Damage { power: 1.8 },
    },
    TechniqueDef {
        id: "mend",
        essence_cost: 10,
        cooldown_ticks: 8,
        requires_target: false,
        effect: TechniqueEffect::Heal { amount: 40 },
    },
    TechniqueDef {
        id: "stoneskin",
        essence_cost: 20,
        cooldown_ticks: 20,
        requires_target: false,
        effect: TechniqueEffect::Shield { shield_hp: 60, duration_ticks: 10 },
    },
    TechniqueDef {
        id: "battle_cry",
        essence_cost: 12,
        cooldown_ticks: 16,
        requires_target: false,
        effect: TechniqueEffect::Buff {
            stat_modifiers: Stats { str_: 8, agi: 0, int: 0, def: 0, hp: 0 },
            duration_ticks: 8,
        },
    },
    TechniqueDef {
        id: "insight_draught",
        essence_cost: 25,
        cooldown_ticks: 40,
        requires_target: false,
        effect: TechniqueEffect::XpBoost { multiplier: 1.5, duration_ticks: 40 },
    },
];

pub fn lookup(id: &str) -> Option<&'static TechniqueDef> {
    REGISTRY.iter().find(|t| t.id == id)
}

/// Resolves every pending `cast` order: a caster who doesn't know the
/// technique, has it on cooldown, or lacks the essence simply has the order
/// dropped without effect.
pub fn resolve_cast_orders(state: &mut ZoneState, ctx: &ZoneContext) {
    let casts: Vec<(EntityId, String, Option<EntityId>)> = state
        .entities
        .values()
        .filter_map(|e| match (&e.kind, e.order()) {
            (EntityKind::Player(_), Some(Order::Cast { technique_id, target })) if e.is_alive() => {
                Some((e.id, technique_id.clone(), *target))
            }
            _ => None,
        })
        .collect();

    for (caster_id, technique_id, target) in casts {
        clear_order(state, caster_id);

        let Some(def) = lookup(&technique_id) else {
            state.log(
                EventType::System,
                format!("{caster_id} tried to cast unknown technique '{technique_id}'"),
                Some(caster_id),
                None,
                serde_json::json!({}),
            );
            continue;
        };
        if def.requires_target && target.is_none() {
            continue;
        }
        if !can_cast(state, caster_id, def) {
            continue;
        }

        pay_cast_cost(state, caster_id, def);
        apply_technique_effect(state, ctx, caster_id, target, def);
    }
}

fn can_cast(state: &ZoneState, caster_id: EntityId, def: &TechniqueDef) -> bool {
    let Some(entity) = state.entities.get(&caster_id) else { return false };
    let EntityKind::Player(caster) = &entity.kind else { return false };
    if !caster.known_techniques.iter().any(|known| known == def.id) {
        return false;
    }
    if caster.cooldowns.get(def.id).copied().unwrap_or(0) > 0 {
        return false;
    }
    caster.vitals.essence >= def.essence_cost
}

fn pay_cast_cost(state: &mut ZoneState, caster_id: EntityId, def: &TechniqueDef) {
    let Some(entity) = state.entities.get_mut(&caster_id) else { return };
    let EntityKind::Player(caster) = &mut entity.kind else { return };
    caster.vitals.essence = caster.vitals.essence.saturating_sub(def.essence_cost);
    caster.cooldowns.insert(def.id.to_string(), def.cooldown_ticks);
}

fn apply_technique_effect(
    state: &mut ZoneState,
    ctx: &ZoneContext,
    caster_id: EntityId,
    target: Option<EntityId>,
    def: &TechniqueDef,
) {
    match def.effect {
        TechniqueEffect::Damage { power } => cast_damage(state, ctx, caster_id, target, def.id, power),
        TechniqueEffect::Heal { amount } => cast_heal(state, caster_id, target, def.id, amount),
        TechniqueEffect::Shield { shield_hp, duration_ticks } => {
            grant_effect(
                state,
                caster_id,
                target,
                Effect {
                    name: def.id.to_string(),
                    kind: EffectKind::Shield,
                    remaining_ticks: duration_ticks,
                    stat_modifiers: Stats::default(),
                    hot_heal_per_tick: 0,
                    shield_hp,
                    xp_multiplier: 1.0,
                },
            );
        }
        TechniqueEffect::Buff { stat_modifiers, duration_ticks } => {
            grant_effect(
                state,
                caster_id,
                target,
                Effect {
                    name: def.id.to_string(),
                    kind: EffectKind::Buff,
                    remaining_ticks: duration_ticks,
                    stat_modifiers,
                    hot_heal_per_tick: 0,
                    shield_hp: 0,
                    xp_multiplier: 1.0,
                },
            );
            if let Some(entity) = state.entities.get_mut(&target.unwrap_or(caster_id)) {
                if let EntityKind::Player(p) = &mut entity.kind {
                    combat::recompute_effective_stats(p);
                }
            }
        }
        TechniqueEffect::XpBoost { multiplier, duration_ticks } => {
            grant_effect(
                state,
                caster_id,
                target,
                Effect {
                    name: def.id.to_string(),
                    kind: EffectKind::XpBoost,
                    remaining_ticks: duration_ticks,
                    stat_modifiers: Stats::default(),
                    hot_heal_per_tick: 0,
                    shield_hp: 0,
                    xp_multiplier: multiplier,
                },
            );
        }
    }
}

/// Damage goes through the same shield-absorb and mitigation shape a melee
/// attack uses, then hands a kill off to [`combat::handle_kill`] so loot/XP
/// and respawn/death handling stay in one place.
fn cast_damage(
    state: &mut ZoneState,
    ctx: &ZoneContext,
    caster_id: EntityId,
    target: Option<EntityId>,
    technique_id: &str,
    power: f64,
) {
    let Some(target_id) = target else { return };
    let Some(caster_entity) = state.entities.get(&caster_id) else { return };
    let EntityKind::Player(caster) = &caster_entity.kind else { return };
    let caster_str = caster.effective_stats.str_;

    let Some(target_entity) = state.entities.get(&target_id) else { return };
    if !target_entity.is_alive() {
        return;
    }
    let defender_def = match &target_entity.kind {
        EntityKind::Player(p) => p.effective_stats.def,
        EntityKind::Mob(m) => m.effective_stats.def,
        _ => return,
    };

    const MITIGATION_K: f64 = 50.0;
    let mitigation = MITIGATION_K / (MITIGATION_K + defender_def.max(0) as f64);
    let damage = ((caster_str.max(0) as f64 * power) * mitigation).max(1.0).round() as u32;

    let died = {
        let Some(target_mut) = state.entities.get_mut(&target_id) else { return };
        let remaining = combat::absorb_with_shield(target_mut, damage);
        match &mut target_mut.kind {
            EntityKind::Player(p) => {
                p.vitals.damage(remaining);
                p.vitals.hp == 0
            }
            EntityKind::Mob(m) => {
                m.tagged_by.get_or_insert(caster_id);
                m.vitals.damage(remaining);
                m.vitals.hp == 0
            }
            _ => return,
        }
    };

    state.log(
        EventType::Combat,
        format!("{caster_id} cast {technique_id} on {target_id} for {damage}"),
        Some(caster_id),
        Some(target_id),
        serde_json::json!({"damage": damage, "technique": technique_id}),
    );

    if died {
        combat::handle_kill(state, caster_id, target_id, &ctx.config, ctx);
    }
}

fn cast_heal(state: &mut ZoneState, caster_id: EntityId, target: Option<EntityId>, technique_id: &str, amount: u32) {
    let recipient = target.unwrap_or(caster_id);
    let Some(entity) = state.entities.get_mut(&recipient) else { return };
    match &mut entity.kind {
        EntityKind::Player(p) => p.vitals.heal(amount),
        EntityKind::Mob(m) => m.vitals.heal(amount),
        _ => return,
    }
    state.log(
        EventType::Combat,
        format!("{caster_id} cast {technique_id} on {recipient} healing {amount}"),
        Some(caster_id),
        Some(recipient),
        serde_json::json!({"healed": amount, "technique": technique_id}),
    );
}

fn grant_effect(state: &mut ZoneState, caster_id: EntityId, target: Option<EntityId>, effect: Effect) {
    let recipient = target.unwrap_or(caster_id);
    let Some(entity) = state.entities.get_mut(&recipient) else { return };
    let effects = match &mut entity.kind {
        EntityKind::Player(p) => &mut p.effects,
        EntityKind::Mob(m) => &mut m.effects,
        _ => return,
    };
    let name = effect.name.clone();
    effects.push(effect);
    state.log(
        EventType::Combat,
        format!("{caster_id} applied {name} to {recipient}"),
        Some(caster_id),
        Some(recipient),
        serde_json::json!({"effect": name}),
    );
}

fn clear_order(state: &mut ZoneState, entity_id: EntityId) {
    if let Some(entity) = state.entities.get_mut(&entity_id) {
        entity.set_order(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, PlayerState, Vitals};
    use crate::ledger::{GoldLedger, MockAssetLedger, TransactionSerializer};
    use crate::math::Vec2;
    use std::sync::Arc;

    fn make_ctx() -> ZoneContext {
        let config = Arc::new(crate::config::test_config());
        let adapter = Arc::new(MockAssetLedger::new());
        let ledger = TransactionSerializer::spawn(adapter, config.ledger_max_retries);
        ZoneContext { config, gold_ledger: Arc::new(GoldLedger::new()), ledger }
    }

    fn make_caster(essence: u32) -> (Entity, EntityId) {
        let mut player = PlayerState::new(
            crate::ids::WalletId("caster".into()),
            "r".into(),
            "c".into(),
            Stats { str_: 20, ..Default::default() },
        );
        player.vitals = Vitals::new(100, 100);
        player.vitals.essence = essence;
        let id = EntityId::new();
        (Entity { id, name: "caster".into(), position: Vec2::ZERO, kind: EntityKind::Player(Box::new(player)) }, id)
    }

    #[tokio::test]
    async fn cast_without_essence_is_dropped_without_effect() {
        let ctx = make_ctx();
        let mut state = ZoneState::new(crate::ids::ZoneId::new("z"), 10, false);
        let (mut caster_entity, caster_id) = make_caster(0);
        caster_entity.set_order(Some(Order::Cast { technique_id: "mend".into(), target: None }));
        state.entities.insert(caster_id, caster_entity);

        resolve_cast_orders(&mut state, &ctx);

        let EntityKind::Player(p) = &state.entities.get(&caster_id).unwrap().kind else { panic!() };
        assert_eq!(p.vitals.hp, p.vitals.max_hp, "mend must not have healed (nothing was missing) nor errored");
        assert!(p.cooldowns.get("mend").is_none(), "a failed cast must not set a cooldown");
    }

    #[tokio::test]
    async fn mend_heals_the_caster_and_sets_a_cooldown() {
        let ctx = make_ctx();
        let mut state = ZoneState::new(crate::ids::ZoneId::new("z"), 10, false);
        let (mut caster_entity, caster_id) = make_caster(100);
        if let EntityKind::Player(p) = &mut caster_entity.kind {
            p.vitals.damage(50);
        }
        caster_entity.set_order(Some(Order::Cast { technique_id: "mend".into(), target: None }));
        state.entities.insert(caster_id, caster_entity);

        resolve_cast_orders(&mut state, &ctx);

        let EntityKind::Player(p) = &state.entities.get(&caster_id).unwrap().kind else { panic!() };
        assert_eq!(p.vitals.hp, 90, "mend must have healed 40 hp");
        assert_eq!(*p.cooldowns.get("mend").unwrap(), 8);
        assert_eq!(p.vitals.essence, 90, "essence cost must be deducted");
    }

    #[test]
    fn unknown_technique_is_rejected() {
        assert!(lookup("meteor_storm").is_none());
    }
}
