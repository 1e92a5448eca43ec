//! The Zone Runtime (SPEC_FULL.md §4.1): a set of [`ZoneState`] instances,
//! each advanced by its own owning `tokio` task at the configured cadence.
//!
//! Concurrency shape, grounded on the teacher's `SharedServerInner`: a
//! `flume` inbox feeds mutations into the task that exclusively owns the
//! mutable state, while read-mostly/administrative access goes through a
//! `tokio::sync::Mutex` the owning task also locks once per tick. The
//! teacher gets away with an uncontended-by-construction `bevy_ecs::World`
//! because only the schedule runner ever touches it; this shard additionally
//! needs synchronous, read-after-write operations from API handlers
//! (snapshot, portal transition, NPC interaction) that can't wait for the
//! next tick, so those go through the mutex directly instead of the inbox.
//! Per SPEC_FULL.md §5, the Dungeon Gate subsystem is the one caller that is
//! restricted to the inbox for every mutation.

pub mod combat;
pub mod dispatcher;
pub mod dungeon_gate;
pub mod event_log;
pub mod loot;
pub mod portal;
pub mod resource_node;
pub mod technique;
pub mod tick;

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info};

use crate::config::ShardConfig;
use crate::entity::{Entity, MobSpawnTemplate, Order};
use crate::ids::{EntityId, ZoneId};
use crate::ledger::{GoldLedger, TransactionSerializerHandle};
use crate::math::Vec2;
use event_log::{Event, EventLog, EventType};

/// Party/expiry bookkeeping for a dungeon instance zone.
#[derive(Debug, Clone)]
pub struct InstanceMetadata {
    pub party: Vec<EntityId>,
    pub source_zone: ZoneId,
    pub source_positions: HashMap<EntityId, Vec2>,
    pub expires_at_ms: i64,
    pub cleared: bool,
}

pub struct ZoneState {
    pub id: ZoneId,
    pub tick: u64,
    pub entities: HashMap<EntityId, Entity>,
    pub events: EventLog,
    pub is_instance: bool,
    pub instance_metadata: Option<InstanceMetadata>,
    pub graveyard: Vec2,
    /// (respawn-at-tick, template) pairs queued when a mob dies; drained
    /// each tick alongside resource-node respawn (SPEC_FULL.md's Lifecycle
    /// section: "mobs ... respawned from their original definition after a
    /// fixed delay").
    pub mob_respawns: Vec<(u64, MobSpawnTemplate)>,
    pub rng: StdRng,
}

impl ZoneState {
    fn new(id: ZoneId, event_log_capacity: usize, is_instance: bool) -> Self {
        Self {
            id,
            tick: 0,
            entities: HashMap::new(),
            events: EventLog::new(event_log_capacity),
            is_instance,
            instance_metadata: None,
            graveyard: Vec2::ZERO,
            mob_respawns: Vec::new(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn log(
        &mut self,
        event_type: EventType,
        message: impl Into<String>,
        actor_id: Option<EntityId>,
        target_id: Option<EntityId>,
        data: serde_json::Value,
    ) {
        self.events.push(event_type, self.tick, message, actor_id, target_id, data);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneSnapshot {
    pub tick: u64,
    pub entities: HashMap<EntityId, Entity>,
}

/// Messages a zone's owning task drains from its inbox at the start of each
/// tick, before running the numbered phases in SPEC_FULL.md §4.1.
pub enum ZoneMessage {
    ApplyOrder { entity_id: EntityId, order: Order },
    InsertEntity { entity: Entity },
    RemoveEntity { entity_id: EntityId },
    RecordEvent {
        event_type: EventType,
        message: String,
        actor_id: Option<EntityId>,
        target_id: Option<EntityId>,
        data: serde_json::Value,
    },
    /// Posted by [`dungeon_gate::DungeonGateScheduler`] on its own interval;
    /// an overworld zone rolls a new gate in response, an instance zone
    /// ignores it.
    SurgeGate,
}

#[derive(Clone)]
struct ZoneHandle {
    state: Arc<AsyncMutex<ZoneState>>,
    inbox_tx: flume::Sender<ZoneMessage>,
}

/// Shared context every zone's tick needs beyond its own state: ledger
/// access for loot/XP mints and the shard-wide tunables.
#[derive(Clone)]
pub struct ZoneContext {
    pub config: Arc<ShardConfig>,
    pub gold_ledger: Arc<GoldLedger>,
    pub ledger: TransactionSerializerHandle,
}

pub struct ZoneRuntime {
    zones: parking_lot::Mutex<HashMap<ZoneId, ZoneHandle>>,
    ctx: ZoneContext,
    /// A handle back to the enclosing `Arc`, populated at construction via
    /// `Arc::new_cyclic`, so methods taking only `&self` can still spawn a
    /// self-referential tick task. Stable Rust has no blessed `&Arc<Self>`
    /// receiver, so this is the usual way around it.
    self_ref: std::sync::Weak<ZoneRuntime>,
}

impl ZoneRuntime {
    pub fn new(ctx: ZoneContext) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            zones: parking_lot::Mutex::new(HashMap::new()),
            ctx,
            self_ref: weak.clone(),
        })
    }

    fn arc_self(&self) -> Arc<ZoneRuntime> {
        self.self_ref.upgrade().expect("zone runtime dropped while still in use")
    }

    pub fn config(&self) -> &ShardConfig {
        &self.ctx.config
    }

    pub fn ledger(&self) -> &TransactionSerializerHandle {
        &self.ctx.ledger
    }

    pub(crate) fn ctx(&self) -> &ZoneContext {
        &self.ctx
    }

    /// Idempotent: returns the existing handle, or lazily creates a zone and
    /// spawns its tick task.
    fn get_or_create_handle(&self, id: &ZoneId) -> ZoneHandle {
        let mut zones = self.zones.lock();
        if let Some(handle) = zones.get(id) {
            return handle.clone();
        }
        let state = Arc::new(AsyncMutex::new(ZoneState::new(
            id.clone(),
            self.ctx.config.event_log_capacity,
            false,
        )));
        let (inbox_tx, inbox_rx) = flume::bounded(self.ctx.config.zone_inbox_capacity);
        let handle = ZoneHandle {
            state: state.clone(),
            inbox_tx,
        };
        zones.insert(id.clone(), handle.clone());
        let runtime = self.arc_self();
        let zone_id = id.clone();
        tokio::spawn(async move {
            runtime.run_zone(zone_id, state, inbox_rx).await;
        });
        handle
    }

    /// Same as [`Self::get_or_create_handle`] but for a freshly-built
    /// instance zone (dungeon instances are never created lazily by
    /// reference; the Dungeon Gate subsystem constructs them explicitly).
    pub fn create_instance_zone(&self, id: ZoneId, metadata: InstanceMetadata) {
        let mut zones = self.zones.lock();
        if zones.contains_key(&id) {
            return;
        }
        let mut state = ZoneState::new(id.clone(), self.ctx.config.event_log_capacity, true);
        state.instance_metadata = Some(metadata);
        let state = Arc::new(AsyncMutex::new(state));
        let (inbox_tx, inbox_rx) = flume::bounded(self.ctx.config.zone_inbox_capacity);
        let handle = ZoneHandle {
            state: state.clone(),
            inbox_tx,
        };
        zones.insert(id.clone(), handle);
        let runtime = self.arc_self();
        tokio::spawn(async move {
            runtime.run_zone(id, state, inbox_rx).await;
        });
    }

    pub fn destroy_zone(&self, id: &ZoneId) {
        self.zones.lock().remove(id);
    }

    pub fn zone_exists(&self, id: &ZoneId) -> bool {
        self.zones.lock().contains_key(id)
    }

    pub fn zone_ids(&self) -> Vec<ZoneId> {
        self.zones.lock().keys().cloned().collect()
    }

    pub async fn snapshot(&self, id: &ZoneId) -> Option<ZoneSnapshot> {
        let handle = { self.zones.lock().get(id).cloned() }?;
        let state = handle.state.lock().await;
        Some(ZoneSnapshot {
            tick: state.tick,
            entities: state.entities.clone(),
        })
    }

    pub fn events(&self, id: &ZoneId, since: Option<i64>, limit: Option<usize>) -> Option<Vec<Event>> {
        let handle = self.zones.lock().get(id).cloned()?;
        // Events are read through a `try_lock` first; falling back to a
        // blocking wait would stall an HTTP handler behind a running tick.
        // A zone tick holds this mutex only briefly, so the blocking
        // fallback is rare and bounded.
        let state = handle
            .state
            .try_lock()
            .ok()
            .map(|g| g.events.query(since, limit));
        state
    }

    /// Enqueues an order, creating the zone on demand. Non-blocking: a full
    /// inbox surfaces as backpressure rather than stalling the caller.
    pub fn apply_order(
        &self,
        zone_id: &ZoneId,
        entity_id: EntityId,
        order: Order,
    ) -> Result<(), String> {
        let handle = self.get_or_create_handle(zone_id);
        handle
            .inbox_tx
            .try_send(ZoneMessage::ApplyOrder { entity_id, order })
            .map_err(|_| "zone command queue is full".to_owned())
    }

    pub fn send_message(&self, zone_id: &ZoneId, msg: ZoneMessage) -> Result<(), String> {
        let handle = { self.zones.lock().get(zone_id).cloned() };
        match handle {
            Some(h) => h
                .inbox_tx
                .try_send(msg)
                .map_err(|_| "zone command queue is full".to_owned()),
            None => Err(format!("zone {zone_id} does not exist")),
        }
    }

    /// Runs `f` against the zone's state under its mutex. Used for
    /// synchronous dispatcher operations that need a read-after-write result
    /// (spawn, interact, use-item, gate-open): see SPEC_FULL.md §4.2,
    /// "`transition` ... synchronously performs".
    pub async fn with_zone_mut<R>(
        &self,
        zone_id: &ZoneId,
        create_if_missing: bool,
        f: impl FnOnce(&mut ZoneState) -> R,
    ) -> Option<R> {
        let handle = if create_if_missing {
            Some(self.get_or_create_handle(zone_id))
        } else {
            self.zones.lock().get(zone_id).cloned()
        }?;
        let mut state = handle.state.lock().await;
        Some(f(&mut state))
    }

    /// Atomically moves `entity_id` from `from_zone` to `to_zone` at
    /// `dest_pos`, clearing its pending order. Locks both zones' mutexes in
    /// canonical (lexicographic `ZoneId`) order to avoid deadlocking against
    /// a transition running the opposite direction concurrently
    /// (SPEC_FULL.md §4.1, "acquire the source and destination zones in a
    /// canonical order").
    pub async fn transition(
        &self,
        from_zone: &ZoneId,
        entity_id: EntityId,
        to_zone: &ZoneId,
        dest_pos: Vec2,
    ) -> Result<(), String> {
        let from_handle = self
            .zones
            .lock()
            .get(from_zone)
            .cloned()
            .ok_or_else(|| format!("zone {from_zone} does not exist"))?;
        let to_handle = self.get_or_create_handle(to_zone);

        let (first, second, first_is_from) = if from_zone.0 <= to_zone.0 {
            (from_handle.clone(), to_handle.clone(), true)
        } else {
            (to_handle.clone(), from_handle.clone(), false)
        };

        let mut first_guard = first.state.lock().await;
        // Same zone both ways (degenerate transition): operate under one guard.
        if Arc::ptr_eq(&first.state, &second.state) {
            let mut entity = first_guard
                .entities
                .remove(&entity_id)
                .ok_or_else(|| "entity not found in source zone".to_owned())?;
            entity.position = dest_pos;
            entity.set_order(None);
            first_guard.entities.insert(entity_id, entity);
            first_guard.log(
                EventType::Transition,
                "transitioned within the same zone",
                Some(entity_id),
                None,
                serde_json::json!({"zone": to_zone.0}),
            );
            return Ok(());
        }
        let mut second_guard = second.state.lock().await;

        let (from_guard, to_guard): (&mut ZoneState, &mut ZoneState) = if first_is_from {
            (&mut first_guard, &mut second_guard)
        } else {
            (&mut second_guard, &mut first_guard)
        };

        let mut entity = from_guard
            .entities
            .remove(&entity_id)
            .ok_or_else(|| "entity not found in source zone".to_owned())?;
        entity.position = dest_pos;
        entity.set_order(None);
        from_guard.log(
            EventType::Transition,
            format!("departed to {to_zone}"),
            Some(entity_id),
            None,
            serde_json::json!({"zone": to_zone.0}),
        );
        to_guard.entities.insert(entity_id, entity);
        to_guard.log(
            EventType::Transition,
            format!("arrived from {from_zone}"),
            Some(entity_id),
            None,
            serde_json::json!({"zone": from_zone.0}),
        );
        Ok(())
    }

    async fn run_zone(
        self: Arc<Self>,
        zone_id: ZoneId,
        state: Arc<AsyncMutex<ZoneState>>,
        inbox_rx: flume::Receiver<ZoneMessage>,
    ) {
        let mut interval = tokio::time::interval(self.ctx.config.tick_interval());
        info!(%zone_id, "zone tick task started");
        loop {
            interval.tick().await;
            let mut guard = state.lock().await;
            while let Ok(msg) = inbox_rx.try_recv() {
                apply_zone_message(&mut guard, msg, &self.ctx);
            }
            if let Err(panic_msg) = tick::run_tick(&mut guard, &self.ctx) {
                // A fault inside a single order/subsystem step is caught
                // inside `run_tick` itself and logged as a `system` event;
                // reaching here means something escaped that boundary, which
                // SPEC_FULL.md §4.1 treats as fatal ("a panic in the tick
                // loop itself is fatal and should surface to process
                // supervision").
                error!(%zone_id, error = %panic_msg, "fatal fault in zone tick loop");
                panic!("fatal fault in zone {zone_id} tick loop: {panic_msg}");
            }
        }
    }
}

fn apply_zone_message(state: &mut ZoneState, msg: ZoneMessage, ctx: &ZoneContext) {
    match msg {
        ZoneMessage::ApplyOrder { entity_id, order } => {
            if let Some(entity) = state.entities.get_mut(&entity_id) {
                // Re-issuing the same order is a no-op (SPEC_FULL.md §4.2).
                if entity.order() != Some(&order) {
                    entity.set_order(Some(order));
                }
            }
        }
        ZoneMessage::InsertEntity { entity } => {
            state.entities.insert(entity.id, entity);
        }
        ZoneMessage::RemoveEntity { entity_id } => {
            state.entities.remove(&entity_id);
        }
        ZoneMessage::RecordEvent {
            event_type,
            message,
            actor_id,
            target_id,
            data,
        } => {
            state.log(event_type, message, actor_id, target_id, data);
        }
        ZoneMessage::SurgeGate => {
            if state.is_instance {
                return;
            }
            let position = Vec2::new(
                state.rng.gen_range(-200.0..200.0),
                state.rng.gen_range(-200.0..200.0),
            );
            let gate = dungeon_gate::roll_new_gate(&mut state.rng, &ctx.config, &state.id, position);
            state.log(
                EventType::GateSurge,
                format!("a new gate ({}) has appeared", gate.name),
                None,
                Some(gate.id),
                serde_json::json!({}),
            );
            state.entities.insert(gate.id, gate);
        }
    }
}
