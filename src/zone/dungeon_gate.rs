//! Dungeon gate lifecycle: periodic surges that spawn new gates, and the
//! open-and-enter transaction that turns a gate into a live instance zone
//! (SPEC_FULL.md §4.8).
//!
//! The periodic surge never touches a zone's [`super::ZoneState`] directly —
//! it only posts a [`super::ZoneMessage::SurgeGate`] into each overworld
//! zone's inbox, same as any other order submission, so a concurrent tick
//! can never observe a gate appear mid-phase.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::config::ShardConfig;
use crate::entity::{Entity, EntityKind, GateRank, GateState};
use crate::error::ShardError;
use crate::ids::{EntityId, ZoneId};
use crate::math::Vec2;

use super::event_log::EventType;
use super::{InstanceMetadata, ZoneMessage, ZoneRuntime};

/// Runs on its own interval, independent of any single zone's tick cadence,
/// and keeps only the set of known overworld zone ids — never a zone's
/// entity map.
pub struct DungeonGateScheduler {
    runtime: Arc<ZoneRuntime>,
    config: Arc<ShardConfig>,
}

impl DungeonGateScheduler {
    pub fn spawn(runtime: Arc<ZoneRuntime>, config: Arc<ShardConfig>) {
        tokio::spawn(async move {
            DungeonGateScheduler { runtime, config }.run().await;
        });
    }

    /// Each interval throws a single throttled surge across a random subset
    /// of `gate_surge_min_zones..=gate_surge_max_zones` eligible zones,
    /// rather than spawning a gate in every zone every interval
    /// (SPEC_FULL.md §4.8, "spawn 3-6 new gates across eligible zones").
    async fn run(self) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.surge_interval_ms));
        let mut rng = StdRng::from_entropy();
        loop {
            interval.tick().await;
            let mut eligible = self.runtime.zone_ids();
            if eligible.is_empty() {
                continue;
            }
            eligible.shuffle(&mut rng);
            let count = rng
                .gen_range(self.config.gate_surge_min_zones..=self.config.gate_surge_max_zones)
                .min(eligible.len());
            for zone_id in eligible.into_iter().take(count) {
                if self.runtime.send_message(&zone_id, ZoneMessage::SurgeGate).is_err() {
                    info!(%zone_id, "gate surge dropped, zone inbox full");
                }
            }
        }
    }
}

/// Derives a stable 0-2 danger tier from the zone's id so different zones
/// draw from different rank distributions without needing extra mutable
/// zone state (SPEC_FULL.md §4.8, "zone-weighted distribution").
fn zone_danger_tier(zone_id: &ZoneId) -> u32 {
    let hash = zone_id.0.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
    (hash % 3) as u32
}

/// Rolls a new gate's rank, weighted toward the common low ranks and shifted
/// upward for zones with a higher danger tier, and produces the entity a
/// zone inserts on `SurgeGate`. A danger roll both flags the gate and
/// upgrades its rank by one step (SPEC_FULL.md §4.8).
pub fn roll_new_gate(rng: &mut impl Rng, config: &ShardConfig, zone_id: &ZoneId, position: Vec2) -> Entity {
    let tier_shift = zone_danger_tier(zone_id) as f64 * 0.15;
    let roll: f64 = (rng.gen_range(0.0..1.0) + tier_shift).min(0.999_999);
    let mut rank = if roll < 0.45 {
        GateRank::E
    } else if roll < 0.72 {
        GateRank::D
    } else if roll < 0.88 {
        GateRank::C
    } else if roll < 0.96 {
        GateRank::B
    } else if roll < 0.995 {
        GateRank::A
    } else {
        GateRank::S
    };
    let is_danger = rng.gen_bool(0.05);
    if is_danger {
        rank = rank.upgraded();
    }
    Entity {
        id: EntityId::new(),
        name: format!("{rank:?}-rank gate"),
        position,
        kind: EntityKind::DungeonGate(GateState {
            rank,
            is_danger,
            gate_expires_at_ms: crate::config::chrono_like::now_millis() + config.gate_lifetime(),
            gate_opened: false,
        }),
    }
}

/// Opens `gate_id` in `source_zone` for `party`, creating a fresh instance
/// zone and transitioning every party member into it. Fails without
/// mutating anything if the gate is already open, the party is oversized
/// for the gate's rank, or any member is under-leveled.
pub async fn open_gate_and_enter(
    runtime: &Arc<ZoneRuntime>,
    config: &ShardConfig,
    source_zone: &ZoneId,
    gate_id: EntityId,
    party: Vec<EntityId>,
) -> Result<ZoneId, ShardError> {
    let (rank, gate_position) = runtime
        .with_zone_mut(source_zone, false, |state| -> Result<(GateRank, Vec2), ShardError> {
            let entity = state
                .entities
                .get(&gate_id)
                .ok_or_else(|| ShardError::precondition("gate not found"))?;
            let EntityKind::DungeonGate(gate) = &entity.kind else {
                return Err(ShardError::precondition("target is not a gate"));
            };
            if gate.gate_opened {
                return Err(ShardError::precondition("gate is already open"));
            }
            if party.len() > gate.rank.max_party_size() {
                return Err(ShardError::precondition("party too large for this gate"));
            }
            for member_id in &party {
                let member = state
                    .entities
                    .get(member_id)
                    .ok_or_else(|| ShardError::precondition("party member not found"))?;
                let EntityKind::Player(p) = &member.kind else {
                    return Err(ShardError::precondition("only players may enter a gate"));
                };
                if p.level < gate.rank.min_level() {
                    return Err(ShardError::precondition("a party member is under-leveled for this gate"));
                }
            }
            Ok((gate.rank, entity.position))
        })
        .await
        .ok_or_else(|| ShardError::precondition("zone not found"))??;

    let instance_zone = ZoneId::instance(&format!("dungeon-{rank:?}").to_lowercase());
    let mut source_positions = std::collections::HashMap::new();
    for member_id in &party {
        source_positions.insert(*member_id, gate_position);
    }
    runtime.create_instance_zone(
        instance_zone.clone(),
        InstanceMetadata {
            party: party.clone(),
            source_zone: source_zone.clone(),
            source_positions,
            expires_at_ms: crate::config::chrono_like::now_millis() + config.gate_lifetime(),
            cleared: false,
        },
    );

    runtime
        .with_zone_mut(source_zone, false, |state| {
            if let Some(entity) = state.entities.get_mut(&gate_id) {
                if let EntityKind::DungeonGate(gate) = &mut entity.kind {
                    gate.gate_opened = true;
                }
            }
            state.log(
                EventType::System,
                format!("gate {gate_id} opened into {instance_zone}"),
                party.first().copied(),
                Some(gate_id),
                serde_json::json!({"instance_zone": instance_zone.0}),
            );
        })
        .await;

    for member_id in &party {
        runtime
            .transition(source_zone, *member_id, &instance_zone, Vec2::ZERO)
            .await
            .map_err(ShardError::precondition)?;
    }

    Ok(instance_zone)
}

/// Checks whether an instance zone's objective is complete (no living
/// bosses remain) and, if so, marks it cleared and logs the event. Called
/// from the instance zone's own tick, since it only reads/writes entities it
/// already owns.
pub fn check_instance_cleared(state: &mut super::ZoneState) {
    let Some(metadata) = &mut state.instance_metadata else { return };
    if metadata.cleared {
        return;
    }
    let any_boss_alive = state.entities.values().any(|e| {
        matches!(&e.kind, EntityKind::Mob(m) if m.is_boss) && e.is_alive()
    });
    let had_boss_ever = state.entities.values().any(|e| matches!(&e.kind, EntityKind::Mob(m) if m.is_boss));
    if had_boss_ever && !any_boss_alive {
        metadata.cleared = true;
        state.log(EventType::DungeonCleared, "instance cleared", None, None, serde_json::json!({}));
    }
}

/// Tears down instance zones whose clear (or expiry) window has elapsed.
/// Runs alongside [`DungeonGateScheduler`] on the same interval; reads
/// `instance_metadata` through the same synchronous mutex path the API
/// layer uses for snapshots, not the inbox, since destroying the zone's
/// registry entry is a runtime-level operation rather than a state mutation.
pub async fn sweep_expired_instances(runtime: &Arc<ZoneRuntime>) {
    for zone_id in runtime.zone_ids() {
        let should_destroy = runtime
            .with_zone_mut(&zone_id, false, |state| {
                state.is_instance
                    && state
                        .instance_metadata
                        .as_ref()
                        .map(|m| m.cleared && crate::config::chrono_like::now_millis() > m.expires_at_ms)
                        .unwrap_or(false)
            })
            .await
            .unwrap_or(false);
        if should_destroy {
            info!(%zone_id, "tearing down cleared dungeon instance");
            runtime.destroy_zone(&zone_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roll_new_gate_always_unopened_and_future_expiry() {
        let config = crate::config::test_config();
        let mut rng = StdRng::seed_from_u64(3);
        let zone_id = ZoneId::new("overworld");
        let gate = roll_new_gate(&mut rng, &config, &zone_id, Vec2::ZERO);
        let EntityKind::DungeonGate(g) = gate.kind else { panic!() };
        assert!(!g.gate_opened);
        assert!(g.gate_expires_at_ms > crate::config::chrono_like::now_millis());
    }

    #[test]
    fn danger_roll_upgrades_rank_by_one_step() {
        assert_eq!(GateRank::E.upgraded(), GateRank::D);
        assert_eq!(GateRank::A.upgraded(), GateRank::S);
        assert_eq!(GateRank::S.upgraded(), GateRank::S);
    }
}
