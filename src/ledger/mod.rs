//! The transaction-serialized external-mint/burn pipeline backing the
//! in-game economy (SPEC_FULL.md §4.7).

pub mod asset_ledger;
pub mod gold_ledger;
pub mod serializer;

pub use asset_ledger::{AssetLedgerAdapter, LedgerError, MockAssetLedger};
pub use gold_ledger::GoldLedger;
pub use serializer::{LedgerOp, TransactionSerializer, TransactionSerializerHandle};
