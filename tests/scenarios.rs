//! End-to-end scenario tests exercising the zone runtime, dispatcher, and
//! ledger together, rather than any one module in isolation.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use wyrmshard::config::ShardConfig;
use wyrmshard::entity::{
    Entity, EntityKind, GateRank, GateState, MobSpawnTemplate, Order, PlayerState, PortalState,
    ResourceNodeState, ResourceType, Stats,
};
use wyrmshard::ids::{EntityId, TokenId, WalletId, ZoneId};
use wyrmshard::ledger::{AssetLedgerAdapter, GoldLedger, LedgerOp, MockAssetLedger, TransactionSerializer};
use wyrmshard::math::Vec2;
use wyrmshard::zone::dispatcher::{self, CommandAction};
use wyrmshard::zone::event_log::EventType;
use wyrmshard::zone::{tick, ZoneContext, ZoneRuntime};

fn test_config() -> ShardConfig {
    ShardConfig::parse_from(["wyrmshardd"])
}

/// Builds a [`ZoneContext`] plus the mock adapter backing its ledger, so a
/// test can both drive the zone and read the resulting balances.
fn make_ctx() -> (ZoneContext, Arc<MockAssetLedger>) {
    let config = Arc::new(test_config());
    let adapter = Arc::new(MockAssetLedger::new());
    let ledger = TransactionSerializer::spawn(adapter.clone(), config.ledger_max_retries);
    let ctx = ZoneContext {
        config,
        gold_ledger: Arc::new(GoldLedger::new()),
        ledger,
    };
    (ctx, adapter)
}

fn player_entity(wallet: WalletId, position: Vec2, str_: i32) -> Entity {
    let mut player = PlayerState::new(
        wallet,
        "human".into(),
        "warrior".into(),
        Stats {
            str_,
            def: 2,
            hp: 100,
            ..Default::default()
        },
    );
    player.vitals.hp = player.vitals.max_hp;
    Entity {
        id: EntityId::new(),
        name: "hero".into(),
        position,
        kind: EntityKind::Player(Box::new(player)),
    }
}

fn mob_entity(position: Vec2, hp: u32) -> Entity {
    let template = MobSpawnTemplate {
        name: "wolf".into(),
        position,
        level: 1,
        base_stats: Stats {
            str_: 1,
            def: 0,
            hp: hp as i32,
            ..Default::default()
        },
        max_hp: hp,
        xp_reward: 50,
        loot_table: wyrmshard::zone::loot::LootTable {
            copper_min: 5,
            copper_max: 5,
            auto_drops: vec![wyrmshard::zone::loot::LootEntry {
                token_id: TokenId(7),
                min_qty: 1,
                max_qty: 1,
                chance: 1.0,
            }],
            skinning_drops: Vec::new(),
        },
        is_boss: false,
        respawn_delay_ticks: 5,
    };
    Entity {
        id: EntityId::new(),
        name: template.name.clone(),
        position: template.position,
        kind: EntityKind::Mob(Box::new(template.instantiate())),
    }
}

/// Polls `adapter` for up to a second: detached loot mints land on their own
/// spawned task, asynchronously with respect to the tick call that queued
/// them, so a balance assertion right after `run_tick` would be racy.
async fn wait_for_gold(adapter: &MockAssetLedger, wallet: &WalletId, at_least: u64) -> u64 {
    for _ in 0..50 {
        let balance = adapter.gold_balance(wallet).await.unwrap();
        if balance >= at_least {
            return balance;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    adapter.gold_balance(wallet).await.unwrap()
}

#[tokio::test]
async fn solo_kill_awards_loot_and_xp() {
    let (ctx, adapter) = make_ctx();
    let zone_id = ZoneId::new("field");
    let runtime = ZoneRuntime::new(ctx.clone());

    let attacker_wallet = WalletId("hero-wallet".into());
    let attacker = player_entity(attacker_wallet.clone(), Vec2::ZERO, 50);
    let attacker_id = attacker.id;
    let mob = mob_entity(Vec2::new(1.0, 0.0), 1);
    let mob_id = mob.id;

    runtime
        .with_zone_mut(&zone_id, true, |zone| {
            zone.entities.insert(attacker_id, attacker);
            zone.entities.insert(mob_id, mob);
            zone.entities
                .get_mut(&attacker_id)
                .unwrap()
                .set_order(Some(Order::Attack { target: mob_id }));
        })
        .await;

    runtime
        .with_zone_mut(&zone_id, false, |zone| tick::run_tick(zone, &ctx).unwrap())
        .await;

    let corpse_present = runtime
        .with_zone_mut(&zone_id, false, |zone| {
            matches!(zone.entities.get(&mob_id).map(|e| &e.kind), Some(EntityKind::Corpse(_)))
        })
        .await
        .unwrap();
    assert!(corpse_present, "the mob's entity id must now hold a corpse");

    let xp_awarded = runtime
        .with_zone_mut(&zone_id, false, |zone| {
            let EntityKind::Player(p) = &zone.entities.get(&attacker_id).unwrap().kind else { panic!() };
            p.xp > 0 || p.level > 1
        })
        .await
        .unwrap();
    assert!(xp_awarded, "the killer must have been awarded xp");

    let balance = wait_for_gold(&adapter, &attacker_wallet, 5).await;
    assert_eq!(balance, 5, "the rolled copper drop must be minted to the killer's wallet");
}

#[tokio::test]
async fn tag_guarantees_loot_even_after_a_second_attacker_lands_the_kill() {
    let (ctx, _adapter) = make_ctx();
    let zone_id = ZoneId::new("field");
    let runtime = ZoneRuntime::new(ctx.clone());

    let tagger = player_entity(WalletId("tagger-wallet".into()), Vec2::ZERO, 1);
    let tagger_id = tagger.id;
    let finisher = player_entity(WalletId("finisher-wallet".into()), Vec2::new(2.0, 0.0), 2000);
    let finisher_id = finisher.id;
    // High hp so the tagger's weak hit cannot also land the kill; the tag
    // and the kill need to fall on separate ticks for this scenario.
    let mob = mob_entity(Vec2::new(1.0, 0.0), 1000);
    let mob_id = mob.id;

    runtime
        .with_zone_mut(&zone_id, true, |zone| {
            zone.entities.insert(tagger_id, tagger);
            zone.entities.insert(finisher_id, finisher);
            zone.entities.insert(mob_id, mob);
            zone.entities
                .get_mut(&tagger_id)
                .unwrap()
                .set_order(Some(Order::Attack { target: mob_id }));
        })
        .await;

    runtime
        .with_zone_mut(&zone_id, false, |zone| tick::run_tick(zone, &ctx).unwrap())
        .await;

    let tagged_by = runtime
        .with_zone_mut(&zone_id, false, |zone| {
            let EntityKind::Mob(m) = &zone.entities.get(&mob_id).unwrap().kind else { panic!() };
            m.tagged_by
        })
        .await
        .unwrap();
    assert_eq!(tagged_by, Some(tagger_id), "the first hit must tag the mob");

    runtime
        .with_zone_mut(&zone_id, false, |zone| {
            zone.entities.get_mut(&tagger_id).unwrap().set_order(None);
            zone.entities
                .get_mut(&finisher_id)
                .unwrap()
                .set_order(Some(Order::Attack { target: mob_id }));
        })
        .await;
    runtime
        .with_zone_mut(&zone_id, false, |zone| tick::run_tick(zone, &ctx).unwrap())
        .await;

    let allowed_looters = runtime
        .with_zone_mut(&zone_id, false, |zone| {
            let EntityKind::Corpse(c) = &zone.entities.get(&mob_id).unwrap().kind else { panic!() };
            c.allowed_looters.clone()
        })
        .await
        .unwrap();
    assert!(allowed_looters.contains(&tagger_id), "the tagger must retain looting rights");
    assert!(allowed_looters.contains(&finisher_id), "the finisher must also be able to loot");
}

#[tokio::test]
async fn resource_node_recharges_after_its_respawn_delay() {
    let (ctx, _adapter) = make_ctx();
    let zone_id = ZoneId::new("mine");
    let runtime = ZoneRuntime::new(ctx.clone());

    let node = Entity {
        id: EntityId::new(),
        name: "ore vein".into(),
        position: Vec2::ZERO,
        kind: EntityKind::ResourceNode(ResourceNodeState {
            resource_type: ResourceType::Ore,
            charges: 0,
            max_charges: 3,
            depleted_at_tick: Some(0),
            respawn_ticks: 2,
            required_tool_tier: 0,
            yield_token_id: TokenId(9),
            yield_min: 1,
            yield_max: 1,
            profession_xp: 1,
        }),
    };
    let node_id = node.id;

    runtime
        .with_zone_mut(&zone_id, true, |zone| {
            zone.entities.insert(node_id, node);
        })
        .await;

    for _ in 0..3 {
        runtime
            .with_zone_mut(&zone_id, false, |zone| tick::run_tick(zone, &ctx).unwrap())
            .await;
    }

    let charges = runtime
        .with_zone_mut(&zone_id, false, |zone| {
            let EntityKind::ResourceNode(n) = &zone.entities.get(&node_id).unwrap().kind else { panic!() };
            n.charges
        })
        .await
        .unwrap();
    assert_eq!(charges, 3, "the node must be back at full charges once its respawn delay elapses");
}

#[tokio::test]
async fn portal_transition_requires_range_and_level() {
    let (ctx, _adapter) = make_ctx();
    let config = test_config();
    let origin = ZoneId::new("origin");
    let runtime = ZoneRuntime::new(ctx);

    let wallet = WalletId("traveler".into());
    let player = player_entity(wallet.clone(), Vec2::ZERO, 10);
    let player_id = player.id;
    let portal = Entity {
        id: EntityId::new(),
        name: "waygate".into(),
        position: Vec2::new(5.0, 0.0),
        kind: EntityKind::Portal(PortalState {
            dest_zone: ZoneId::new("destination"),
            dest_pos: Vec2::ZERO,
            level_requirement: 1,
        }),
    };
    let portal_id = portal.id;

    runtime
        .with_zone_mut(&origin, true, |zone| {
            zone.entities.insert(player_id, player);
            zone.entities.insert(portal_id, portal);
        })
        .await;

    let result = dispatcher::dispatch(
        &runtime,
        &config,
        &origin,
        player_id,
        &wallet,
        CommandAction::UsePortal { portal_id },
    )
    .await;
    assert!(result.is_ok(), "an in-range, level-eligible player must transition: {result:?}");

    let arrived = runtime
        .with_zone_mut(&ZoneId::new("destination"), false, |zone| {
            zone.entities.contains_key(&player_id)
        })
        .await
        .unwrap_or(false);
    assert!(arrived, "the player must now exist in the destination zone");

    let still_in_origin = runtime
        .with_zone_mut(&origin, false, |zone| zone.entities.contains_key(&player_id))
        .await
        .unwrap_or(true);
    assert!(!still_in_origin, "the player must no longer exist in the origin zone");
}

#[tokio::test]
async fn out_of_range_portal_use_is_rejected_and_leaves_the_player_in_place() {
    let (ctx, _adapter) = make_ctx();
    let config = test_config();
    let origin = ZoneId::new("origin");
    let runtime = ZoneRuntime::new(ctx);

    let wallet = WalletId("traveler".into());
    let player = player_entity(wallet.clone(), Vec2::ZERO, 10);
    let player_id = player.id;
    let portal = Entity {
        id: EntityId::new(),
        name: "waygate".into(),
        position: Vec2::new(5000.0, 0.0),
        kind: EntityKind::Portal(PortalState {
            dest_zone: ZoneId::new("destination"),
            dest_pos: Vec2::ZERO,
            level_requirement: 1,
        }),
    };
    let portal_id = portal.id;

    runtime
        .with_zone_mut(&origin, true, |zone| {
            zone.entities.insert(player_id, player);
            zone.entities.insert(portal_id, portal);
        })
        .await;

    let result = dispatcher::dispatch(
        &runtime,
        &config,
        &origin,
        player_id,
        &wallet,
        CommandAction::UsePortal { portal_id },
    )
    .await;
    assert!(result.is_err(), "an out-of-range portal use must be rejected");

    let still_in_origin = runtime
        .with_zone_mut(&origin, false, |zone| zone.entities.contains_key(&player_id))
        .await
        .unwrap_or(false);
    assert!(still_in_origin, "a rejected transition must leave the player where they were");
}

#[tokio::test]
async fn unopened_gate_fades_after_its_lifetime_elapses() {
    let (ctx, _adapter) = make_ctx();
    let zone_id = ZoneId::new("overworld");
    let runtime = ZoneRuntime::new(ctx.clone());

    let gate = Entity {
        id: EntityId::new(),
        name: "rift".into(),
        position: Vec2::ZERO,
        kind: EntityKind::DungeonGate(GateState {
            rank: GateRank::E,
            is_danger: false,
            gate_expires_at_ms: wyrmshard::config::chrono_like::now_millis() - 1,
            gate_opened: false,
        }),
    };
    let gate_id = gate.id;

    runtime
        .with_zone_mut(&zone_id, true, |zone| {
            zone.entities.insert(gate_id, gate);
        })
        .await;

    runtime
        .with_zone_mut(&zone_id, false, |zone| tick::run_tick(zone, &ctx).unwrap())
        .await;

    let gate_gone = runtime
        .with_zone_mut(&zone_id, false, |zone| !zone.entities.contains_key(&gate_id))
        .await
        .unwrap();
    assert!(gate_gone, "an already-expired, unopened gate must be removed by the tick");

    let faded_logged = runtime
        .events(&zone_id, None, None)
        .map(|events| events.iter().any(|e| e.event_type == EventType::GateFaded))
        .unwrap_or(false);
    assert!(faded_logged, "a GateFaded event must be recorded");
}

#[tokio::test]
async fn ledger_serializes_concurrent_mints_onto_one_final_balance() {
    let adapter = Arc::new(MockAssetLedger::new());
    let config = test_config();
    let ledger = TransactionSerializer::spawn(adapter.clone(), config.ledger_max_retries);
    let wallet = WalletId("concurrent-wallet".into());

    let mut handles = Vec::new();
    for _ in 0..20 {
        let ledger = ledger.clone();
        let wallet = wallet.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .submit(LedgerOp::MintGold { wallet, amount: 3 })
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(adapter.gold_balance(&wallet).await.unwrap(), 60);
}
