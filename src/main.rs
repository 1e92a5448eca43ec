//! `wyrmshardd`: boots one shard process — the zone runtime, the ledger
//! serializer, the dungeon gate scheduler, and the HTTP API — and runs until
//! told to stop.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;
use wyrmshard::config::ShardConfig;
use wyrmshard::world::World;
use wyrmshard::zone::dungeon_gate::{self, DungeonGateScheduler};

#[tokio::main]
async fn main() {
    let config = ShardConfig::from_env();
    init_tracing(&config.log_filter);

    info!(bind_addr = %config.bind_addr, tick_interval_ms = config.tick_interval_ms, "starting wyrmshard");

    // The real chain adapter is an external collaborator out of scope here
    // (SPEC_FULL.md §1); wire the in-process mock so the shard is runnable
    // standalone until a real adapter is plugged into `World::new`.
    let world = Arc::new(World::new_with_mock_ledger(config));

    DungeonGateScheduler::spawn(world.zones.clone(), world.config.clone());
    spawn_instance_sweeper(world.zones.clone(), world.config.tick_interval_ms);

    let routes = wyrmshard::api::routes(world.clone());
    let bind_addr = world.config.bind_addr;
    let (addr, server) = warp::serve(routes).bind_with_graceful_shutdown(bind_addr, async {
        tokio::signal::ctrl_c().await.expect("failed to listen for ctrl_c");
        info!("shutdown signal received, draining in-flight requests");
    });
    info!(%addr, "listening");
    server.await;
    info!("shutdown complete");
}

/// Periodically tears down cleared dungeon instance zones past their expiry.
/// Runs independently of any single zone's own tick, same cadence family as
/// [`DungeonGateScheduler`].
fn spawn_instance_sweeper(zones: Arc<wyrmshard::zone::ZoneRuntime>, interval_ms: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1000)));
        loop {
            interval.tick().await;
            dungeon_gate::sweep_expired_instances(&zones).await;
        }
    });
}

fn init_tracing(log_filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}
