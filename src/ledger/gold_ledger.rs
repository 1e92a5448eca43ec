//! In-memory bookkeeping of *reserved* and *spent* gold per wallet
//! (SPEC_FULL.md §4.7). Never the source of truth — a write-through cache of
//! intent that prevents double-spends within the horizon between a command
//! and its on-chain settlement.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::ids::WalletId;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    reserved: u64,
    spent: u64,
}

pub struct GoldLedger {
    wallets: Mutex<HashMap<WalletId, Counters>>,
}

impl GoldLedger {
    pub fn new() -> Self {
        Self {
            wallets: Mutex::new(HashMap::new()),
        }
    }

    /// `availableGold = onChainGold - reserved - spent`, clamped at zero.
    pub fn available_gold(&self, wallet: &WalletId, on_chain_gold: u64) -> u64 {
        let wallets = self.wallets.lock();
        let c = wallets.get(wallet).copied().unwrap_or_default();
        on_chain_gold.saturating_sub(c.reserved).saturating_sub(c.spent)
    }

    /// Reserves `amount` against `wallet`. Fails without mutating state if
    /// doing so would push `availableGold` below zero.
    pub fn reserve(&self, wallet: &WalletId, amount: u64, on_chain_gold: u64) -> Result<(), String> {
        let mut wallets = self.wallets.lock();
        let c = wallets.entry(wallet.clone()).or_default();
        let available = on_chain_gold.saturating_sub(c.reserved).saturating_sub(c.spent);
        if available < amount {
            return Err(format!("insufficient gold: available {available}, need {amount}"));
        }
        c.reserved += amount;
        Ok(())
    }

    pub fn unreserve(&self, wallet: &WalletId, amount: u64) {
        let mut wallets = self.wallets.lock();
        let c = wallets.entry(wallet.clone()).or_default();
        c.reserved = c.reserved.saturating_sub(amount);
    }

    pub fn record_spend(&self, wallet: &WalletId, amount: u64) {
        let mut wallets = self.wallets.lock();
        wallets.entry(wallet.clone()).or_default().spent += amount;
    }
}

impl Default for GoldLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_unreserve_restores_prior_value() {
        let ledger = GoldLedger::new();
        let wallet = WalletId("r1".into());
        ledger.reserve(&wallet, 30, 100).unwrap();
        ledger.unreserve(&wallet, 30);
        assert_eq!(ledger.available_gold(&wallet, 100), 100);
    }

    #[test]
    fn reserve_beyond_available_fails_without_mutating() {
        let ledger = GoldLedger::new();
        let wallet = WalletId("r2".into());
        ledger.reserve(&wallet, 40, 100).unwrap();
        let err = ledger.reserve(&wallet, 70, 100);
        assert!(err.is_err());
        assert_eq!(ledger.available_gold(&wallet, 100), 60);
    }

    #[test]
    fn available_gold_never_negative() {
        let ledger = GoldLedger::new();
        let wallet = WalletId("r3".into());
        ledger.record_spend(&wallet, 500);
        assert_eq!(ledger.available_gold(&wallet, 100), 0);
    }
}
