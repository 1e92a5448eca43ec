//! The entity data model.
//!
//! The teacher represents a Minecraft entity as an extensible bag of
//! optional ECS components (`Position`, `Look`, `HeadYaw`, ...) attached to a
//! bare `bevy_ecs::Entity` handle. This shard has no ECS world backing it, and
//! the spec calls for re-expressing "optional fields per kind" as an
//! exhaustive tagged variant instead (see SPEC_FULL.md §9, "Dynamic entity
//! shapes"): [`EntityKind`] carries exactly the payload its variant needs,
//! and matching on it is exhaustive rather than a chain of `is_some()`
//! checks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{EntityId, TokenId, WalletId};
use crate::math::Vec2;

/// The unit the zone simulates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub position: Vec2,
    pub kind: EntityKind,
}

impl Entity {
    pub fn is_combatant(&self) -> bool {
        matches!(self.kind, EntityKind::Player(_) | EntityKind::Mob(_))
    }

    pub fn is_alive(&self) -> bool {
        match &self.kind {
            EntityKind::Player(p) => p.vitals.hp > 0,
            EntityKind::Mob(m) => m.vitals.hp > 0,
            _ => false,
        }
    }

    pub fn hp(&self) -> Option<u32> {
        match &self.kind {
            EntityKind::Player(p) => Some(p.vitals.hp),
            EntityKind::Mob(m) => Some(m.vitals.hp),
            _ => None,
        }
    }

    /// Current pending order, if this entity's kind tracks one.
    pub fn order(&self) -> Option<&Order> {
        match &self.kind {
            EntityKind::Player(p) => p.order.as_ref(),
            EntityKind::Mob(m) => m.order.as_ref(),
            _ => None,
        }
    }

    pub fn set_order(&mut self, order: Option<Order>) {
        match &mut self.kind {
            EntityKind::Player(p) => p.order = order,
            EntityKind::Mob(m) => m.order = order,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum EntityKind {
    Player(Box<PlayerState>),
    Mob(Box<MobState>),
    Npc(NpcState),
    CraftingStation(StationKind),
    ResourceNode(ResourceNodeState),
    Corpse(CorpseState),
    DungeonGate(GateState),
    Portal(PortalState),
}

/// Vitals shared by every combatant (player or mob).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Vitals {
    pub hp: u32,
    pub max_hp: u32,
    pub essence: u32,
    pub max_essence: u32,
}

impl Vitals {
    pub fn new(max_hp: u32, max_essence: u32) -> Self {
        Self {
            hp: max_hp,
            max_hp,
            essence: max_essence,
            max_essence,
        }
    }

    /// Clamps `hp`/`essence` back into `[0, max]`. Called after every
    /// mutation so the bounded-vitals invariant never slips, even
    /// transiently, between two pieces of code that both touch `hp`.
    pub fn clamp(&mut self) {
        self.hp = self.hp.min(self.max_hp);
        self.essence = self.essence.min(self.max_essence);
    }

    pub fn heal(&mut self, amount: u32) {
        self.hp = (self.hp + amount).min(self.max_hp);
    }

    /// Subtracts `amount` from `hp`, saturating at zero rather than
    /// underflowing (u32 has no negative HP to represent "overkill").
    pub fn damage(&mut self, amount: u32) {
        self.hp = self.hp.saturating_sub(amount);
    }
}

/// Base combat attributes. Also used as the shape of stat modifiers
/// (buffs/gear rolls), where each field is a signed delta rather than an
/// absolute value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Stats {
    pub str_: i32,
    pub agi: i32,
    pub int: i32,
    pub def: i32,
    pub hp: i32,
}

impl std::ops::Add for Stats {
    type Output = Stats;
    fn add(self, rhs: Stats) -> Stats {
        Stats {
            str_: self.str_ + rhs.str_,
            agi: self.agi + rhs.agi,
            int: self.int + rhs.int,
            def: self.def + rhs.def,
            hp: self.hp + rhs.hp,
        }
    }
}

impl std::ops::Mul<i32> for Stats {
    type Output = Stats;
    fn mul(self, rhs: i32) -> Stats {
        Stats {
            str_: self.str_ * rhs,
            agi: self.agi * rhs,
            int: self.int * rhs,
            def: self.def * rhs,
            hp: self.hp * rhs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquipSlot {
    Weapon,
    Chest,
    Legs,
    Boots,
    Helm,
    Shoulders,
    Gloves,
    Belt,
    Ring,
    Amulet,
}

impl EquipSlot {
    pub const ALL: [EquipSlot; 10] = [
        EquipSlot::Weapon,
        EquipSlot::Chest,
        EquipSlot::Legs,
        EquipSlot::Boots,
        EquipSlot::Helm,
        EquipSlot::Shoulders,
        EquipSlot::Gloves,
        EquipSlot::Belt,
        EquipSlot::Ring,
        EquipSlot::Amulet,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquippedItem {
    pub token_id: TokenId,
    pub durability: u32,
    pub max_durability: u32,
    pub broken: bool,
    pub rolled_stats: Option<Stats>,
    pub bonus_affix: Option<String>,
    /// Tool tier for gathering tools; `0` for items that cannot gather.
    pub tool_tier: u32,
    /// Base shop price in copper at full durability, used as the repair-cost
    /// basis (SPEC_FULL.md §6) instead of trusting a client-supplied cost.
    pub copper_price: u64,
}

impl EquippedItem {
    pub fn apply_durability_loss(&mut self, points: u32) {
        self.durability = self.durability.saturating_sub(points);
        if self.durability == 0 {
            self.broken = true;
        }
    }

    /// Broken items contribute no stats, per the invariant in SPEC_FULL.md §3.
    pub fn contributed_stats(&self) -> Stats {
        if self.broken {
            Stats::default()
        } else {
            self.rolled_stats.unwrap_or_default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectKind {
    Buff,
    Hot,
    Shield,
    /// Scales XP credited by [`crate::zone::combat::award_xp`] while active
    /// (SPEC_FULL.md §4.3, "scaled by any active XP tonic").
    XpBoost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Effect {
    pub name: String,
    pub kind: EffectKind,
    pub remaining_ticks: u32,
    pub stat_modifiers: Stats,
    pub hot_heal_per_tick: u32,
    pub shield_hp: u32,
    /// Multiplier applied to XP awards while an `XpBoost` effect is active;
    /// `1.0` (no-op) for every other kind.
    pub xp_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestProgress {
    pub quest_id: String,
    pub progress: u32,
}

/// A pending intent, consumed at most once per tick (SPEC_FULL.md §4.1 step
/// 4). `interact`/`use-item`/`transition` commands resolve synchronously in
/// the dispatcher instead of being stored here, since none of them need more
/// than one tick's worth of state to complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Order {
    #[serde(rename = "move")]
    Move { target: Vec2 },
    #[serde(rename = "attack")]
    Attack { target: EntityId },
    #[serde(rename = "gather")]
    Gather { node: EntityId },
    #[serde(rename = "cast")]
    Cast {
        technique_id: String,
        target: Option<EntityId>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    pub wallet: WalletId,
    pub vitals: Vitals,
    pub level: u32,
    pub xp: u64,
    pub race_id: String,
    pub class_id: String,
    pub base_stats: Stats,
    pub effective_stats: Stats,
    pub equipment: HashMap<EquipSlot, EquippedItem>,
    pub effects: Vec<Effect>,
    pub quests: Vec<QuestProgress>,
    pub kills: u32,
    pub order: Option<Order>,
    /// Technique id -> ticks remaining before it may be cast again.
    pub cooldowns: HashMap<String, u32>,
    /// `true` once this player's gear/level has been applied to
    /// `effective_stats` for the current tick; recomputed lazily by
    /// [`crate::zone::combat::recompute_effective_stats`].
    pub party_id: Option<String>,
    /// Technique ids this player may `cast` (SPEC_FULL.md §4.1 step 4). A
    /// trainer/learning flow is out of scope; every new player starts with
    /// the same small kit.
    pub known_techniques: Vec<String>,
}

impl PlayerState {
    pub fn new(wallet: WalletId, race_id: String, class_id: String, base_stats: Stats) -> Self {
        Self {
            wallet,
            vitals: Vitals::new(base_stats.hp.max(1) as u32, 50),
            level: 1,
            xp: 0,
            race_id,
            class_id,
            base_stats,
            effective_stats: base_stats,
            equipment: HashMap::new(),
            effects: Vec::new(),
            quests: Vec::new(),
            kills: 0,
            order: None,
            cooldowns: HashMap::new(),
            party_id: None,
            known_techniques: vec!["fireball".to_string(), "mend".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobState {
    pub vitals: Vitals,
    pub level: u32,
    pub base_stats: Stats,
    pub effective_stats: Stats,
    pub xp_reward: u64,
    pub loot_table: crate::zone::loot::LootTable,
    pub effects: Vec<Effect>,
    pub tagged_by: Option<EntityId>,
    pub is_boss: bool,
    pub order: Option<Order>,
    /// Where this mob was originally placed, so death/respawn can recreate
    /// it in the same spot with the same template.
    pub spawn: MobSpawnTemplate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobSpawnTemplate {
    pub name: String,
    pub position: Vec2,
    pub level: u32,
    pub base_stats: Stats,
    pub max_hp: u32,
    pub xp_reward: u64,
    pub loot_table: crate::zone::loot::LootTable,
    pub is_boss: bool,
    pub respawn_delay_ticks: u64,
}

impl MobSpawnTemplate {
    pub fn instantiate(&self) -> MobState {
        MobState {
            vitals: Vitals::new(self.max_hp, 0),
            level: self.level,
            base_stats: self.base_stats,
            effective_stats: self.base_stats,
            xp_reward: self.xp_reward,
            loot_table: self.loot_table.clone(),
            effects: Vec::new(),
            tagged_by: None,
            is_boss: self.is_boss,
            order: None,
            spawn: self.clone(),
        }
    }
}

/// Multi-role NPC capabilities (SPEC_FULL.md §9, "Multi-role NPCs"): a set of
/// capability records keyed on this NPC, rather than a kind-per-role scheme.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NpcCapabilities {
    pub merchant: Option<MerchantCapability>,
    pub trainer: Option<TrainerCapability>,
    pub lore: Option<String>,
    pub auctioneer: bool,
    pub guild_registrar: bool,
    pub quest_giver: Vec<String>,
    pub arena_master: bool,
    pub profession_trainer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantCapability {
    pub shop_item_token_ids: Vec<TokenId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerCapability {
    pub teaches_technique_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcState {
    pub capabilities: NpcCapabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationKind {
    Forge,
    Altar,
    Campfire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    Ore,
    Flower,
    Nectar,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceNodeState {
    pub resource_type: ResourceType,
    pub charges: u32,
    pub max_charges: u32,
    pub depleted_at_tick: Option<u64>,
    pub respawn_ticks: u64,
    pub required_tool_tier: u32,
    pub yield_token_id: TokenId,
    pub yield_min: u32,
    pub yield_max: u32,
    pub profession_xp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpseState {
    pub mob_name: String,
    pub skinned: bool,
    pub skinnable_until_ms: i64,
    pub skinning_drops: Vec<crate::zone::loot::LootEntry>,
    /// The tagger and (if any) their party, snapshotted at death — only
    /// these ids may skin the corpse (SPEC_FULL.md §3, tag immutability).
    pub allowed_looters: Vec<EntityId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GateRank {
    E,
    D,
    C,
    B,
    A,
    S,
}

impl GateRank {
    pub fn min_level(self) -> u32 {
        match self {
            GateRank::E => 1,
            GateRank::D => 8,
            GateRank::C => 16,
            GateRank::B => 26,
            GateRank::A => 38,
            GateRank::S => 50,
        }
    }

    pub fn max_party_size(self) -> usize {
        match self {
            GateRank::E | GateRank::D => 4,
            GateRank::C | GateRank::B => 6,
            GateRank::A | GateRank::S => 8,
        }
    }

    /// The next rank up, or `S` itself once already at the top (SPEC_FULL.md
    /// §4.8, a danger roll "upgrades the rank").
    pub fn upgraded(self) -> GateRank {
        match self {
            GateRank::E => GateRank::D,
            GateRank::D => GateRank::C,
            GateRank::C => GateRank::B,
            GateRank::B => GateRank::A,
            GateRank::A | GateRank::S => GateRank::S,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateState {
    pub rank: GateRank,
    pub is_danger: bool,
    pub gate_expires_at_ms: i64,
    pub gate_opened: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalState {
    pub dest_zone: crate::ids::ZoneId,
    pub dest_pos: Vec2,
    pub level_requirement: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vitals_damage_saturates_at_zero() {
        let mut v = Vitals::new(10, 0);
        v.damage(999);
        assert_eq!(v.hp, 0);
    }

    #[test]
    fn vitals_heal_clamps_to_max() {
        let mut v = Vitals::new(10, 0);
        v.damage(8);
        v.heal(100);
        assert_eq!(v.hp, 10);
    }

    #[test]
    fn broken_equipped_item_contributes_no_stats() {
        let mut item = EquippedItem {
            token_id: TokenId(1),
            durability: 1,
            max_durability: 10,
            broken: false,
            rolled_stats: Some(Stats {
                str_: 5,
                ..Default::default()
            }),
            bonus_affix: None,
            tool_tier: 0,
            copper_price: 100,
        };
        item.apply_durability_loss(1);
        assert!(item.broken);
        assert_eq!(item.contributed_stats().str_, 0);
    }
}
