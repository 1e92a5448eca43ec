//! The top-level `World`: every shared collaborator an API handler needs,
//! bundled into one injectable value (SPEC_FULL.md §9, "inject as an
//! explicit `World` value... tests better" — the teacher's `Server`/
//! `SharedServer` plays the same role of "the one thing every handler
//! closes over").

use std::sync::Arc;

use crate::config::ShardConfig;
use crate::ledger::{AssetLedgerAdapter, GoldLedger, MockAssetLedger, TransactionSerializer, TransactionSerializerHandle};
use crate::session::SessionStore;
use crate::zone::{ZoneContext, ZoneRuntime};

pub struct World {
    pub config: Arc<ShardConfig>,
    pub zones: Arc<ZoneRuntime>,
    pub sessions: Arc<SessionStore>,
    pub gold_ledger: Arc<GoldLedger>,
    pub ledger: TransactionSerializerHandle,
    pub asset_ledger: Arc<dyn AssetLedgerAdapter>,
}

impl World {
    /// Builds a `World` wired against a real asset ledger adapter.
    pub fn new(config: ShardConfig, asset_ledger: Arc<dyn AssetLedgerAdapter>) -> Self {
        let config = Arc::new(config);
        let ledger = TransactionSerializer::spawn(asset_ledger.clone(), config.ledger_max_retries);
        let gold_ledger = Arc::new(GoldLedger::new());
        let zones = ZoneRuntime::new(ZoneContext {
            config: config.clone(),
            gold_ledger: gold_ledger.clone(),
            ledger: ledger.clone(),
        });
        let sessions = Arc::new(SessionStore::new(config.challenge_freshness_secs, config.session_ttl_hours));
        Self {
            config,
            zones,
            sessions,
            gold_ledger,
            ledger,
            asset_ledger,
        }
    }

    /// Convenience constructor for development/tests: wires an in-process
    /// [`MockAssetLedger`] instead of a real chain client.
    pub fn new_with_mock_ledger(config: ShardConfig) -> Self {
        Self::new(config, Arc::new(MockAssetLedger::new()))
    }
}
