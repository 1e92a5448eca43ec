//! Shard-wide tunables.
//!
//! Mirrors the teacher's `ServerPlugin` configuration struct: one field per
//! tunable, a doc comment naming the default, constructed through a single
//! `from_env` entry point rather than scattered `env::var` calls.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "wyrmshardd", about = "Authoritative world simulation shard")]
pub struct ShardConfig {
    /// The socket address the HTTP API binds to.
    ///
    /// # Default Value
    /// `0.0.0.0:7777`
    #[arg(long, env = "SHARD_BIND_ADDR", default_value = "0.0.0.0:7777")]
    pub bind_addr: SocketAddr,

    /// Milliseconds between zone ticks.
    ///
    /// # Default Value
    /// `500`
    #[arg(long, env = "SHARD_TICK_INTERVAL_MS", default_value_t = 500)]
    pub tick_interval_ms: u64,

    /// How long an unopened dungeon gate may exist before it fades, in
    /// milliseconds.
    ///
    /// # Default Value
    /// `180_000` (3 minutes)
    #[arg(long, env = "SHARD_GATE_LIFETIME_MS", default_value_t = 180_000)]
    pub gate_lifetime_ms: u64,

    /// Milliseconds between dungeon-gate surges.
    ///
    /// # Default Value
    /// `300_000` (5 minutes)
    #[arg(long, env = "SHARD_SURGE_INTERVAL_MS", default_value_t = 300_000)]
    pub surge_interval_ms: u64,

    /// How long a corpse remains skinnable after death, in milliseconds.
    ///
    /// # Default Value
    /// `90_000`
    #[arg(long, env = "SHARD_CORPSE_SKIN_WINDOW_MS", default_value_t = 90_000)]
    pub corpse_skin_window_ms: u64,

    /// World-unit distance within which a `move` order is considered
    /// arrived and is cleared.
    ///
    /// # Default Value
    /// `15.0`
    #[arg(long, env = "SHARD_ARRIVAL_THRESHOLD", default_value_t = 15.0)]
    pub arrival_threshold: f64,

    /// World-unit distance within which an `attack` order may land without
    /// the attacker first moving closer.
    ///
    /// # Default Value
    /// `40.0`
    #[arg(long, env = "SHARD_ATTACK_RANGE", default_value_t = 40.0)]
    pub attack_range: f64,

    /// World-unit distance within which a mob will chase its tagger.
    ///
    /// # Default Value
    /// `150.0`
    #[arg(long, env = "SHARD_AGGRO_RANGE", default_value_t = 150.0)]
    pub aggro_range: f64,

    /// World-unit distance within which a resource node may be gathered.
    ///
    /// # Default Value
    /// `60.0`
    #[arg(long, env = "SHARD_GATHER_RANGE", default_value_t = 60.0)]
    pub gather_range: f64,

    /// World-unit distance within which a portal may be used.
    ///
    /// # Default Value
    /// `30.0`
    #[arg(long, env = "SHARD_PORTAL_RANGE", default_value_t = 30.0)]
    pub portal_range: f64,

    /// Movement speed in world units per tick.
    ///
    /// # Default Value
    /// `20.0`
    #[arg(long, env = "SHARD_MOVE_SPEED", default_value_t = 20.0)]
    pub move_speed: f64,

    /// The level cap. XP earned at this level is banked but never advances
    /// the level further.
    ///
    /// # Default Value
    /// `60`
    #[arg(long, env = "SHARD_MAX_LEVEL", default_value_t = 60)]
    pub max_level: u32,

    /// Hours a session's bearer credential remains valid after issue.
    ///
    /// # Default Value
    /// `24`
    #[arg(long, env = "SHARD_SESSION_TTL_HOURS", default_value_t = 24)]
    pub session_ttl_hours: i64,

    /// How far (in either direction) a signed auth challenge's timestamp may
    /// drift from the server's clock and still be accepted, in seconds.
    ///
    /// # Default Value
    /// `300` (five minutes)
    #[arg(long, env = "SHARD_CHALLENGE_FRESHNESS_SECS", default_value_t = 300)]
    pub challenge_freshness_secs: i64,

    /// Fraction of max HP a dying player is restored to on respawn.
    ///
    /// # Default Value
    /// `0.25`
    #[arg(long, env = "SHARD_DEATH_HP_RESTORE", default_value_t = 0.25)]
    pub death_hp_restore_fraction: f64,

    /// Fraction of max durability every equipped item loses on player death.
    ///
    /// # Default Value
    /// `0.10`
    #[arg(long, env = "SHARD_DEATH_DURABILITY_LOSS", default_value_t = 0.10)]
    pub death_durability_loss_fraction: f64,

    /// Maximum events retained per zone's event log ring buffer.
    ///
    /// # Default Value
    /// `500`
    #[arg(long, env = "SHARD_EVENT_LOG_CAPACITY", default_value_t = 500)]
    pub event_log_capacity: usize,

    /// Maximum outstanding commands queued per zone before new submissions
    /// are rejected with backpressure.
    ///
    /// # Default Value
    /// `256`
    #[arg(long, env = "SHARD_ZONE_INBOX_CAPACITY", default_value_t = 256)]
    pub zone_inbox_capacity: usize,

    /// Maximum retry attempts the transaction serializer makes for a single
    /// ledger operation before surfacing failure to the caller.
    ///
    /// # Default Value
    /// `3`
    #[arg(long, env = "SHARD_LEDGER_MAX_RETRIES", default_value_t = 3)]
    pub ledger_max_retries: u32,

    /// HP restored by the `use_item` command's consumable fallback, for
    /// tokens not otherwise known to the shard as equipment or materials.
    ///
    /// # Default Value
    /// `50`
    #[arg(long, env = "SHARD_USE_ITEM_HEAL_AMOUNT", default_value_t = 50)]
    pub use_item_heal_amount: u32,

    /// Minimum number of zones a dungeon-gate surge spawns a gate into.
    ///
    /// # Default Value
    /// `3`
    #[arg(long, env = "SHARD_GATE_SURGE_MIN_ZONES", default_value_t = 3)]
    pub gate_surge_min_zones: usize,

    /// Maximum number of zones a dungeon-gate surge spawns a gate into.
    ///
    /// # Default Value
    /// `6`
    #[arg(long, env = "SHARD_GATE_SURGE_MAX_ZONES", default_value_t = 6)]
    pub gate_surge_max_zones: usize,

    /// Tracing filter directives, passed straight to `EnvFilter`.
    ///
    /// # Default Value
    /// `"wyrmshard=info,warp=info"`
    #[arg(long, env = "RUST_LOG", default_value = "wyrmshard=info,warp=info")]
    pub log_filter: String,
}

impl ShardConfig {
    /// Parses configuration from CLI args with environment-variable
    /// fallback. The single construction path for [`ShardConfig`].
    pub fn from_env() -> Self {
        Self::parse()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn gate_lifetime(&self) -> chrono_like::Millis {
        chrono_like::Millis(self.gate_lifetime_ms as i64)
    }

    pub fn surge_interval(&self) -> chrono_like::Millis {
        chrono_like::Millis(self.surge_interval_ms as i64)
    }

    pub fn corpse_skin_window(&self) -> chrono_like::Millis {
        chrono_like::Millis(self.corpse_skin_window_ms as i64)
    }
}

/// A tiny stand-in for a duration-in-milliseconds newtype, used for the
/// wall-clock windows (gate lifetime, surge interval, corpse skin window)
/// that are compared against timestamps rather than used as `tokio` sleep
/// durations. Named separately from [`std::time::Duration`] so call sites
/// reads as "wall clock deadline arithmetic" rather than "sleep for this
/// long".
pub mod chrono_like {
    use std::time::{SystemTime, UNIX_EPOCH};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub struct Millis(pub i64);

    /// Milliseconds since the Unix epoch, used as the shard's wall-clock
    /// timestamp for everything that is not tick-indexed (gate expiry,
    /// corpse expiry, session TTL, challenge freshness).
    pub fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as i64
    }

    impl std::ops::Add<Millis> for i64 {
        type Output = i64;
        fn add(self, rhs: Millis) -> i64 {
            self + rhs.0
        }
    }
}

/// Default-valued config for tests elsewhere in the crate that need a
/// [`ShardConfig`] but don't care about any particular tunable.
#[cfg(test)]
pub fn test_config() -> ShardConfig {
    ShardConfig::parse_from(["wyrmshardd"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_args() {
        let cfg = ShardConfig::parse_from(["wyrmshardd"]);
        assert_eq!(cfg.tick_interval_ms, 500);
        assert_eq!(cfg.max_level, 60);
        assert_eq!(cfg.session_ttl_hours, 24);
        assert_eq!(cfg.gate_lifetime_ms, 180_000);
    }
}
