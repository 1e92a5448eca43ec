//! `wyrmshard`: the authoritative world simulation shard for a multi-zone
//! online game. Owns zone state, resolves player commands each tick, and
//! settles the player-facing economy against an external asset ledger.
//!
//! Module layout mirrors the teacher framework's split between world state
//! (`zone`), the entity data model (`entity`), and the outer transport
//! (`api`): nothing in `zone` knows `warp` exists, and nothing in `api`
//! reaches into a `ZoneState` directly.

pub mod api;
pub mod config;
pub mod entity;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod math;
pub mod session;
pub mod world;
pub mod zone;
