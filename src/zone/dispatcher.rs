//! The Command Dispatcher (SPEC_FULL.md §4.2): validates a wallet's command
//! against the entity it claims to control, then either enqueues an
//! [`Order`] for the next tick or, for actions that need a read-after-write
//! result, performs the action synchronously against the zone mutex.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::{EntityKind, EquipSlot, Order};
use crate::error::ShardError;
use crate::ids::{EntityId, TokenId, WalletId, ZoneId};
use crate::ledger::LedgerOp;
use crate::math::Vec2;

use super::{combat, dungeon_gate, portal, ZoneRuntime};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum CommandAction {
    #[serde(rename = "move")]
    Move { target: Vec2 },
    #[serde(rename = "attack")]
    Attack { target: EntityId },
    #[serde(rename = "gather")]
    Gather { node: EntityId },
    #[serde(rename = "cast")]
    Cast { technique_id: String, target: Option<EntityId> },
    #[serde(rename = "use_portal")]
    UsePortal { portal_id: EntityId },
    #[serde(rename = "enter_gate")]
    EnterGate { gate_id: EntityId, party: Vec<EntityId> },
    #[serde(rename = "interact")]
    Interact { npc_id: EntityId },
    #[serde(rename = "use_item")]
    UseItem { token_id: u64, slot: Option<EquipSlot> },
    #[serde(rename = "skin_corpse")]
    SkinCorpse { corpse_id: EntityId },
}

/// Confirms `wallet` owns the live player entity `entity_id` in `zone_id`.
/// Every dispatcher entry point runs this first; nothing downstream trusts
/// `entity_id` on its own.
pub(crate) async fn check_ownership(runtime: &Arc<ZoneRuntime>, zone_id: &ZoneId, entity_id: EntityId, wallet: &WalletId) -> Result<(), ShardError> {
    let owns = runtime
        .with_zone_mut(zone_id, false, |state| {
            state
                .entities
                .get(&entity_id)
                .map(|e| matches!(&e.kind, EntityKind::Player(p) if &p.wallet == wallet && e.is_alive()))
                .unwrap_or(false)
        })
        .await
        .unwrap_or(false);
    if owns {
        Ok(())
    } else {
        Err(ShardError::Unauthorized(format!("{wallet} does not control a live entity {entity_id} in {zone_id}")))
    }
}

/// Dispatches `action` on behalf of `wallet` controlling `entity_id` in
/// `zone_id`. Returns an arbitrary JSON payload — most actions return
/// `{}`; `UsePortal`/`EnterGate` return the destination zone.
pub async fn dispatch(
    runtime: &Arc<ZoneRuntime>,
    config: &crate::config::ShardConfig,
    zone_id: &ZoneId,
    entity_id: EntityId,
    wallet: &WalletId,
    action: CommandAction,
) -> Result<serde_json::Value, ShardError> {
    check_ownership(runtime, zone_id, entity_id, wallet).await?;

    match action {
        CommandAction::Move { target } => {
            enqueue(runtime, zone_id, entity_id, Order::Move { target })?;
            Ok(serde_json::json!({}))
        }
        CommandAction::Attack { target } => {
            enqueue(runtime, zone_id, entity_id, Order::Attack { target })?;
            Ok(serde_json::json!({}))
        }
        CommandAction::Gather { node } => {
            enqueue(runtime, zone_id, entity_id, Order::Gather { node })?;
            Ok(serde_json::json!({}))
        }
        CommandAction::Cast { technique_id, target } => {
            enqueue(runtime, zone_id, entity_id, Order::Cast { technique_id, target })?;
            Ok(serde_json::json!({}))
        }
        CommandAction::UsePortal { portal_id } => {
            let (dest_zone, dest_pos) = runtime
                .with_zone_mut(zone_id, false, |state| portal::validate_portal_use(state, config, entity_id, portal_id))
                .await
                .ok_or_else(|| ShardError::precondition("zone not found"))??;
            runtime
                .transition(zone_id, entity_id, &dest_zone, dest_pos)
                .await
                .map_err(ShardError::precondition)?;
            Ok(serde_json::json!({"zone": dest_zone.0}))
        }
        CommandAction::EnterGate { gate_id, party } => {
            if !party.contains(&entity_id) {
                return Err(ShardError::Unauthorized("the requesting entity must be a party member".into()));
            }
            let instance_zone = dungeon_gate::open_gate_and_enter(runtime, config, zone_id, gate_id, party).await?;
            Ok(serde_json::json!({"zone": instance_zone.0}))
        }
        CommandAction::Interact { npc_id } => {
            let capabilities = runtime
                .with_zone_mut(zone_id, false, |state| {
                    state.entities.get(&npc_id).and_then(|entity| match &entity.kind {
                        EntityKind::Npc(npc) => Some(npc.capabilities.clone()),
                        _ => None,
                    })
                })
                .await
                .flatten()
                .ok_or_else(|| ShardError::precondition("target is not an npc"))?;
            Ok(serde_json::to_value(capabilities).unwrap_or(serde_json::json!({})))
        }
        CommandAction::UseItem { token_id, slot: _ } => {
            let token = TokenId(token_id);
            runtime
                .ledger()
                .submit(LedgerOp::BurnItem { wallet: wallet.clone(), token, qty: 1 })
                .await
                .map_err(|err| ShardError::precondition(format!("item unavailable: {err}")))?;

            let heal = runtime.config().use_item_heal_amount;
            runtime
                .with_zone_mut(zone_id, false, |state| {
                    if let Some(entity) = state.entities.get_mut(&entity_id) {
                        if let EntityKind::Player(p) = &mut entity.kind {
                            p.vitals.hp = (p.vitals.hp + heal).min(p.vitals.max_hp);
                        }
                    }
                })
                .await;
            Ok(serde_json::json!({"healed": heal}))
        }
        CommandAction::SkinCorpse { corpse_id } => {
            runtime
                .with_zone_mut(zone_id, false, |state| combat::skin_corpse(state, runtime.ctx(), entity_id, corpse_id))
                .await
                .ok_or_else(|| ShardError::precondition("zone not found"))??;
            Ok(serde_json::json!({}))
        }
    }
}

/// Idempotent no-op re-issue is handled downstream in the zone's inbox
/// drain ([`super::apply_zone_message`]); this just gets the order queued.
fn enqueue(runtime: &Arc<ZoneRuntime>, zone_id: &ZoneId, entity_id: EntityId, order: Order) -> Result<(), ShardError> {
    runtime
        .apply_order(zone_id, entity_id, order)
        .map_err(ShardError::precondition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, PlayerState, Stats};
    use crate::ledger::{GoldLedger, MockAssetLedger, TransactionSerializer};
    use crate::zone::ZoneContext;
    use std::sync::Arc;

    fn make_runtime() -> Arc<ZoneRuntime> {
        let config = Arc::new(crate::config::test_config());
        let adapter = Arc::new(MockAssetLedger::new());
        let ledger = TransactionSerializer::spawn(adapter, config.ledger_max_retries);
        ZoneRuntime::new(ZoneContext {
            config,
            gold_ledger: Arc::new(GoldLedger::new()),
            ledger,
        })
    }

    #[tokio::test]
    async fn unowned_entity_is_rejected() {
        let runtime = make_runtime();
        let zone_id = ZoneId::new("town");
        let wallet = WalletId("attacker-wallet".into());
        let victim_wallet = WalletId("victim-wallet".into());
        let entity = Entity {
            id: EntityId::new(),
            name: "other hero".into(),
            position: Vec2::ZERO,
            kind: EntityKind::Player(Box::new(PlayerState::new(victim_wallet, "r".into(), "c".into(), Stats::default()))),
        };
        let entity_id = entity.id;
        runtime.with_zone_mut(&zone_id, true, |state| {
            state.entities.insert(entity_id, entity);
        }).await;

        let config = crate::config::test_config();
        let result = dispatch(
            &runtime,
            &config,
            &zone_id,
            entity_id,
            &wallet,
            CommandAction::Move { target: Vec2::ZERO },
        )
        .await;
        assert!(matches!(result, Err(ShardError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn owner_move_command_is_accepted() {
        let runtime = make_runtime();
        let zone_id = ZoneId::new("town");
        let wallet = WalletId("hero-wallet".into());
        let entity = Entity {
            id: EntityId::new(),
            name: "hero".into(),
            position: Vec2::ZERO,
            kind: EntityKind::Player(Box::new(PlayerState::new(wallet.clone(), "r".into(), "c".into(), Stats::default()))),
        };
        let entity_id = entity.id;
        runtime.with_zone_mut(&zone_id, true, |state| {
            state.entities.insert(entity_id, entity);
        }).await;

        let config = crate::config::test_config();
        let result = dispatch(
            &runtime,
            &config,
            &zone_id,
            entity_id,
            &wallet,
            CommandAction::Move { target: Vec2::new(5.0, 5.0) },
        )
        .await;
        assert!(result.is_ok());
    }
}
