//! Combat resolution, effect/cooldown ticking, and death handling
//! (SPEC_FULL.md §4.3). Operates directly on [`ZoneState`] rather than on
//! loose entity references, since a kill needs to remove the victim, insert
//! a corpse, and mutate the killer's XP/level all under the same tick.

use rand::Rng;
use tracing::warn;

use crate::config::ShardConfig;
use crate::entity::{CorpseState, Effect, EffectKind, Entity, EntityKind, MobState, Order, PlayerState, Stats};
use crate::error::ShardError;
use crate::ids::EntityId;
use crate::ledger::LedgerOp;

use super::event_log::EventType;
use super::{ZoneContext, ZoneState};

/// XP required to advance from `level` to `level + 1`.
fn xp_to_next_level(level: u32) -> u64 {
    level as u64 * 100
}

pub fn tick_effects_and_cooldowns(state: &mut ZoneState) {
    for entity in state.entities.values_mut() {
        match &mut entity.kind {
            EntityKind::Player(p) => tick_player_effects(p),
            EntityKind::Mob(m) => tick_mob_effects(m),
            _ => {}
        }
    }
}

fn tick_player_effects(player: &mut PlayerState) {
    apply_hots(&mut player.effects, &mut player.vitals);
    decay_effects(&mut player.effects);
    player.vitals.clamp();
    for cd in player.cooldowns.values_mut() {
        *cd = cd.saturating_sub(1);
    }
    player.cooldowns.retain(|_, ticks| *ticks > 0);
}

fn tick_mob_effects(mob: &mut MobState) {
    apply_hots(&mut mob.effects, &mut mob.vitals);
    decay_effects(&mut mob.effects);
    mob.vitals.clamp();
}

fn apply_hots(effects: &[Effect], vitals: &mut crate::entity::Vitals) {
    for effect in effects {
        if effect.kind == EffectKind::Hot {
            vitals.heal(effect.hot_heal_per_tick);
        }
    }
}

fn decay_effects(effects: &mut Vec<Effect>) {
    effects.retain_mut(|e| {
        e.remaining_ticks = e.remaining_ticks.saturating_sub(1);
        e.remaining_ticks > 0
    });
}

pub fn recompute_all_effective_stats(state: &mut ZoneState) {
    for entity in state.entities.values_mut() {
        if let EntityKind::Player(p) = &mut entity.kind {
            recompute_effective_stats(p);
        }
    }
}

/// Folds base stats, equipped-gear stats (broken items contribute nothing),
/// and active effect modifiers into `effective_stats`, then resizes
/// `max_hp` to match. Forward-referenced from [`PlayerState`]'s doc comment.
pub fn recompute_effective_stats(player: &mut PlayerState) {
    let gear_stats = player
        .equipment
        .values()
        .map(|item| item.contributed_stats())
        .fold(Stats::default(), |a, b| a + b);
    let effect_stats = player
        .effects
        .iter()
        .map(|e| e.stat_modifiers)
        .fold(Stats::default(), |a, b| a + b);
    player.effective_stats = player.base_stats + gear_stats + effect_stats;
    let max_hp = (player.base_stats.hp + gear_stats.hp).max(1) as u32;
    player.vitals.max_hp = max_hp;
    player.vitals.clamp();
}

/// Mobs with a living tagger inside aggro range fight back by issuing
/// themselves an `attack` order against that tagger; mobs with no tagger or
/// an out-of-range tagger are left alone (SPEC_FULL.md's combat model has no
/// passive wandering).
pub fn run_mob_ai(state: &mut ZoneState, config: &ShardConfig) {
    let chases: Vec<(EntityId, EntityId)> = state
        .entities
        .values()
        .filter_map(|e| {
            let EntityKind::Mob(m) = &e.kind else { return None };
            let tagger_id = m.tagged_by?;
            let tagger = state.entities.get(&tagger_id)?;
            if !tagger.is_alive() {
                return None;
            }
            if e.position.distance(tagger.position) > config.aggro_range {
                return None;
            }
            Some((e.id, tagger_id))
        })
        .collect();

    for (mob_id, tagger_id) in chases {
        if let Some(entity) = state.entities.get_mut(&mob_id) {
            entity.set_order(Some(Order::Attack { target: tagger_id }));
        }
    }
}

/// Resolves every outstanding `attack` order in range, applies damage, and
/// hands off kills to [`handle_kill`]. Orders belonging to dead entities, or
/// targeting a dead/missing target, are cleared without effect.
pub fn resolve_combat_orders(state: &mut ZoneState, config: &ShardConfig, ctx: &ZoneContext) {
    let attacks: Vec<(EntityId, EntityId)> = state
        .entities
        .values()
        .filter_map(|e| match e.order() {
            Some(Order::Attack { target }) if e.is_alive() => Some((e.id, *target)),
            _ => None,
        })
        .collect();

    let mut kills: Vec<(EntityId, EntityId)> = Vec::new();

    for (attacker_id, target_id) in attacks {
        let Some(attacker) = state.entities.get(&attacker_id) else { continue };
        let Some(target) = state.entities.get(&target_id) else {
            clear_order(state, attacker_id);
            continue;
        };
        if !target.is_alive() {
            clear_order(state, attacker_id);
            continue;
        }
        if attacker.position.distance(target.position) > config.attack_range {
            // Still moving into range; leave the order pending.
            continue;
        }
        let attacker_stats = match &attacker.kind {
            EntityKind::Player(p) => p.effective_stats,
            EntityKind::Mob(m) => m.effective_stats,
            _ => continue,
        };
        let defender_stats = match &target.kind {
            EntityKind::Player(p) => p.effective_stats,
            EntityKind::Mob(m) => m.effective_stats,
            _ => continue,
        };
        let damage = compute_damage(&attacker_stats, &defender_stats, &mut state.rng);

        if let EntityKind::Mob(m) = &mut state.entities.get_mut(&target_id).unwrap().kind {
            m.tagged_by.get_or_insert(attacker_id);
        }
        let died = {
            let target_mut = state.entities.get_mut(&target_id).unwrap();
            let remaining = absorb_with_shield(target_mut, damage);
            match &mut target_mut.kind {
                EntityKind::Player(p) => {
                    p.vitals.damage(remaining);
                    p.vitals.hp == 0
                }
                EntityKind::Mob(m) => {
                    m.vitals.damage(remaining);
                    m.vitals.hp == 0
                }
                _ => false,
            }
        };

        apply_combat_durability_loss(state, attacker_id, target_id);

        state.log(
            EventType::Combat,
            format!("{attacker_id} hit {target_id} for {damage}"),
            Some(attacker_id),
            Some(target_id),
            serde_json::json!({"damage": damage}),
        );

        if died {
            kills.push((attacker_id, target_id));
        }
    }

    for (killer_id, victim_id) in kills {
        handle_kill(state, killer_id, victim_id, config, ctx);
    }
}

fn clear_order(state: &mut ZoneState, entity_id: EntityId) {
    if let Some(entity) = state.entities.get_mut(&entity_id) {
        entity.set_order(None);
    }
}

/// Chance each of the defender's non-weapon equipped slots loses a point of
/// durability on a landed hit (SPEC_FULL.md §4.3 step 6).
const ARMOR_DURABILITY_LOSS_CHANCE: f64 = 0.25;

/// Absorbs as much of `damage` as the target's active shield effect can
/// cover, consuming the effect once its shield HP reaches zero (SPEC_FULL.md
/// §4.3 step 4). Returns the damage still owed to HP.
pub(crate) fn absorb_with_shield(entity: &mut Entity, damage: u32) -> u32 {
    let effects = match &mut entity.kind {
        EntityKind::Player(p) => &mut p.effects,
        EntityKind::Mob(m) => &mut m.effects,
        _ => return damage,
    };
    let Some(shield) = effects.iter_mut().find(|e| e.kind == EffectKind::Shield) else {
        return damage;
    };
    let absorbed = damage.min(shield.shield_hp);
    shield.shield_hp -= absorbed;
    let remaining = damage - absorbed;
    if shield.shield_hp == 0 {
        effects.retain(|e| e.kind != EffectKind::Shield);
    }
    remaining
}

/// Durability cost of one combat exchange (SPEC_FULL.md §4.3 step 6): the
/// attacker's weapon always loses a point, and each of the defender's
/// non-weapon equipped slots independently rolls to lose one.
fn apply_combat_durability_loss(state: &mut ZoneState, attacker_id: EntityId, target_id: EntityId) {
    if let Some(entity) = state.entities.get_mut(&attacker_id) {
        if let EntityKind::Player(p) = &mut entity.kind {
            if let Some(weapon) = p.equipment.get_mut(&crate::entity::EquipSlot::Weapon) {
                weapon.apply_durability_loss(1);
            }
        }
    }

    let armor_slots: Vec<crate::entity::EquipSlot> = match state.entities.get(&target_id).map(|e| &e.kind) {
        Some(EntityKind::Player(p)) => p
            .equipment
            .keys()
            .filter(|slot| **slot != crate::entity::EquipSlot::Weapon)
            .copied()
            .collect(),
        _ => return,
    };
    for slot in armor_slots {
        if state.rng.gen_bool(ARMOR_DURABILITY_LOSS_CHANCE) {
            if let Some(entity) = state.entities.get_mut(&target_id) {
                if let EntityKind::Player(p) = &mut entity.kind {
                    if let Some(item) = p.equipment.get_mut(&slot) {
                        item.apply_durability_loss(1);
                    }
                }
            }
        }
    }
}

/// Base damage is the attacker's strength scaled by a `[0.9, 1.1)` variance
/// roll, then reduced multiplicatively by the defender's defense
/// (`K / (K + def)`), floored at 1 so an exchange always makes progress.
pub fn compute_damage(attacker: &Stats, defender: &Stats, rng: &mut impl Rng) -> u32 {
    const MITIGATION_K: f64 = 50.0;
    let variance = rng.gen_range(0.9..1.1);
    let mitigation = MITIGATION_K / (MITIGATION_K + defender.def.max(0) as f64);
    let raw = attacker.str_.max(0) as f64 * variance * mitigation;
    raw.max(1.0).round() as u32
}

/// Removes the victim, resolves its death (loot/XP for a mob, respawn
/// penalty for a player), and logs a `kill` event. Shared with
/// [`super::technique::resolve_cast_orders`], since a damaging technique
/// kills a target through the same path a melee attack does.
pub(crate) fn handle_kill(state: &mut ZoneState, killer_id: EntityId, victim_id: EntityId, config: &ShardConfig, ctx: &ZoneContext) {
    let Some(victim) = state.entities.remove(&victim_id) else { return };
    match victim.kind {
        EntityKind::Mob(mob) => handle_mob_death(state, killer_id, victim.id, victim.name, victim.position, *mob, ctx),
        EntityKind::Player(player) => {
            state.entities.insert(
                victim.id,
                Entity {
                    id: victim.id,
                    name: victim.name,
                    position: victim.position,
                    kind: EntityKind::Player(player),
                },
            );
            handle_player_death(state, victim_id, config);
        }
        other => {
            // Non-combatant kinds never reach here; re-insert defensively.
            state.entities.insert(
                victim.id,
                Entity {
                    id: victim.id,
                    name: victim.name,
                    position: victim.position,
                    kind: other,
                },
            );
        }
    }
}

fn handle_mob_death(
    state: &mut ZoneState,
    killer_id: EntityId,
    mob_id: EntityId,
    mob_name: String,
    position: crate::math::Vec2,
    mob: MobState,
    ctx: &ZoneContext,
) {
    let looters = tagged_looters(&mob, killer_id);
    let rolled = mob.loot_table.roll_on_death(&mut state.rng);

    state.mob_respawns.push((state.tick + mob.spawn.respawn_delay_ticks, mob.spawn.clone()));

    let corpse = Entity {
        id: mob_id,
        name: mob_name.clone(),
        position,
        kind: EntityKind::Corpse(CorpseState {
            mob_name,
            skinned: false,
            skinnable_until_ms: crate::config::chrono_like::now_millis() + ctx.config.corpse_skin_window(),
            skinning_drops: mob.loot_table.skinning_drops.clone(),
            allowed_looters: looters,
        }),
    };
    state.entities.insert(mob_id, corpse);

    state.log(
        EventType::Kill,
        format!("{killer_id} killed {mob_id}"),
        Some(killer_id),
        Some(mob_id),
        serde_json::json!({"copper": rolled.copper, "items": rolled.items.len()}),
    );

    award_xp(state, killer_id, mob.xp_reward, config_max_level(ctx));
    mint_loot(ctx, killer_id, state, rolled);
}

fn config_max_level(ctx: &ZoneContext) -> u32 {
    ctx.config.max_level
}

/// The tagger and their party (if any) are the only entities allowed to
/// skin the resulting corpse (SPEC_FULL.md §3, tag immutability).
fn tagged_looters(mob: &MobState, killer_id: EntityId) -> Vec<EntityId> {
    let mut looters = Vec::new();
    if let Some(tagger) = mob.tagged_by {
        looters.push(tagger);
    }
    if !looters.contains(&killer_id) {
        looters.push(killer_id);
    }
    looters
}

fn mint_loot(ctx: &ZoneContext, killer_id: EntityId, state: &mut ZoneState, rolled: super::loot::RolledLoot) {
    let Some(entity) = state.entities.get(&killer_id) else { return };
    let EntityKind::Player(player) = &entity.kind else { return };
    let wallet = player.wallet.clone();

    if rolled.copper > 0 {
        let wallet = wallet.clone();
        ctx.ledger.submit_detached(
            LedgerOp::MintGold {
                wallet,
                amount: rolled.copper,
            },
            |result| {
                if let Err(err) = result {
                    warn!(%err, "loot gold mint failed");
                }
            },
        );
    }
    for (token_id, qty) in rolled.items {
        let wallet = wallet.clone();
        ctx.ledger.submit_detached(
            LedgerOp::MintItem { wallet, token: token_id, qty },
            |result| {
                if let Err(err) = result {
                    warn!(%err, "loot item mint failed");
                }
            },
        );
    }
}

/// Product of every active `XpBoost` effect's multiplier; `1.0` (no-op) for
/// a player with none (SPEC_FULL.md §4.3, "scaled by any active XP tonic").
fn xp_tonic_multiplier(player: &PlayerState) -> f64 {
    player
        .effects
        .iter()
        .filter(|e| e.kind == EffectKind::XpBoost)
        .fold(1.0, |acc, e| acc * e.xp_multiplier)
}

pub(crate) fn award_xp(state: &mut ZoneState, entity_id: EntityId, xp_reward: u64, max_level: u32) {
    let Some(entity) = state.entities.get_mut(&entity_id) else { return };
    let EntityKind::Player(player) = &mut entity.kind else { return };
    if player.level >= max_level {
        return;
    }
    let scaled_xp = ((xp_reward as f64) * xp_tonic_multiplier(player)).round() as u64;
    player.xp += scaled_xp;
    let mut leveled_up = false;
    while player.level < max_level {
        let needed = xp_to_next_level(player.level);
        if player.xp < needed {
            break;
        }
        player.xp -= needed;
        player.level += 1;
        leveled_up = true;
    }
    if leveled_up {
        let new_level = player.level;
        drop(entity);
        state.log(
            EventType::LevelUp,
            format!("{entity_id} reached level {new_level}"),
            Some(entity_id),
            None,
            serde_json::json!({"level": new_level}),
        );
        if let Some(entity) = state.entities.get_mut(&entity_id) {
            if let EntityKind::Player(p) = &mut entity.kind {
                recompute_effective_stats(p);
            }
        }
    }
}

/// Restores the player to a graveyard position with a fraction of max HP,
/// applies durability loss to every equipped item, and clears their pending
/// order (SPEC_FULL.md §9A death-penalty decision).
fn handle_player_death(state: &mut ZoneState, player_id: EntityId, config: &ShardConfig) {
    let graveyard = state.graveyard;
    let Some(entity) = state.entities.get_mut(&player_id) else { return };
    entity.position = graveyard;
    let EntityKind::Player(player) = &mut entity.kind else { return };
    player.order = None;
    player.vitals.hp = ((player.vitals.max_hp as f64) * config.death_hp_restore_fraction).round() as u32;
    player.vitals.hp = player.vitals.hp.max(1);
    for item in player.equipment.values_mut() {
        let loss = ((item.max_durability as f64) * config.death_durability_loss_fraction).round() as u32;
        item.apply_durability_loss(loss);
    }
    state.log(
        EventType::Death,
        format!("{player_id} died and was returned to the graveyard"),
        Some(player_id),
        None,
        serde_json::json!({}),
    );
}

/// Rolls `corpse_id`'s skinning table for `looter_id` and mints the result,
/// marking the corpse skinned so it can't be rolled twice (SPEC_FULL.md §4.4,
/// "skinningDrops ... only rollable by the skinning action ... within its
/// skinnableUntil window"). Only the corpse's `allowed_looters` — the tagger
/// and killer snapshotted at death — may skin it.
pub fn skin_corpse(state: &mut ZoneState, ctx: &ZoneContext, looter_id: EntityId, corpse_id: EntityId) -> Result<(), ShardError> {
    let now = crate::config::chrono_like::now_millis();
    let wallet = {
        let looter = state
            .entities
            .get(&looter_id)
            .ok_or_else(|| ShardError::precondition("looter not found"))?;
        let EntityKind::Player(p) = &looter.kind else {
            return Err(ShardError::precondition("only players may skin corpses"));
        };
        p.wallet.clone()
    };

    let rolled = {
        let corpse_entity = state
            .entities
            .get_mut(&corpse_id)
            .ok_or_else(|| ShardError::precondition("corpse not found"))?;
        let EntityKind::Corpse(corpse) = &mut corpse_entity.kind else {
            return Err(ShardError::precondition("target is not a corpse"));
        };
        if corpse.skinned {
            return Err(ShardError::precondition("corpse already skinned"));
        }
        if now > corpse.skinnable_until_ms {
            return Err(ShardError::precondition("skinning window has closed"));
        }
        if !corpse.allowed_looters.contains(&looter_id) {
            return Err(ShardError::Unauthorized("only the tagger may skin this corpse".into()));
        }
        let drops = corpse.skinning_drops.clone();
        corpse.skinned = true;
        drops
    };

    let items: Vec<(crate::ids::TokenId, u32)> = rolled
        .iter()
        .filter_map(|entry| entry.roll(&mut state.rng).map(|qty| (entry.token_id, qty)))
        .collect();
    for (token_id, qty) in &items {
        ctx.ledger.submit_detached(
            LedgerOp::MintItem { wallet: wallet.clone(), token: *token_id, qty: *qty },
            |result| {
                if let Err(err) = result {
                    warn!(%err, "skinning mint failed");
                }
            },
        );
    }

    state.log(
        EventType::Gather,
        format!("{looter_id} skinned {corpse_id}"),
        Some(looter_id),
        Some(corpse_id),
        serde_json::json!({"items": items.len()}),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn damage_is_never_below_one() {
        let attacker = Stats { str_: 0, ..Default::default() };
        let defender = Stats { def: 1000, ..Default::default() };
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        assert_eq!(compute_damage(&attacker, &defender, &mut rng), 1);
    }

    #[test]
    fn recompute_ignores_broken_item_stats() {
        let mut player = PlayerState::new(
            crate::ids::WalletId("w".into()),
            "race".into(),
            "class".into(),
            Stats { hp: 100, str_: 5, ..Default::default() },
        );
        player.equipment.insert(
            crate::entity::EquipSlot::Weapon,
            crate::entity::EquippedItem {
                token_id: crate::ids::TokenId(1),
                durability: 0,
                max_durability: 10,
                broken: true,
                rolled_stats: Some(Stats { str_: 50, ..Default::default() }),
                bonus_affix: None,
                tool_tier: 0,
                copper_price: 100,
            },
        );
        recompute_effective_stats(&mut player);
        assert_eq!(player.effective_stats.str_, 5);
    }

    fn make_ctx() -> ZoneContext {
        use std::sync::Arc;
        let config = Arc::new(crate::config::test_config());
        let adapter = Arc::new(crate::ledger::MockAssetLedger::new());
        let ledger = crate::ledger::TransactionSerializer::spawn(adapter, config.ledger_max_retries);
        ZoneContext { config, gold_ledger: Arc::new(crate::ledger::GoldLedger::new()), ledger }
    }

    #[tokio::test]
    async fn skinning_rejects_non_looter() {
        let ctx = make_ctx();
        let mut state = ZoneState::new(crate::ids::ZoneId::new("z"), 10, false);
        let looter = EntityId::new();
        let stranger = EntityId::new();
        let corpse_id = EntityId::new();
        state.entities.insert(
            stranger,
            Entity {
                id: stranger,
                name: "stranger".into(),
                position: crate::math::Vec2::ZERO,
                kind: EntityKind::Player(Box::new(PlayerState::new(
                    crate::ids::WalletId("stranger".into()),
                    "r".into(),
                    "c".into(),
                    Stats::default(),
                ))),
            },
        );
        state.entities.insert(
            corpse_id,
            Entity {
                id: corpse_id,
                name: "wolf".into(),
                position: crate::math::Vec2::ZERO,
                kind: EntityKind::Corpse(CorpseState {
                    mob_name: "wolf".into(),
                    skinned: false,
                    skinnable_until_ms: crate::config::chrono_like::now_millis() + 60_000,
                    skinning_drops: Vec::new(),
                    allowed_looters: vec![looter],
                }),
            },
        );
        let err = skin_corpse(&mut state, &ctx, stranger, corpse_id).unwrap_err();
        assert!(matches!(err, ShardError::Unauthorized(_)));
    }
}
