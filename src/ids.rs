//! Opaque identifiers shared across the shard.
//!
//! These mirror the teacher framework's `EntityId` newtype (a thin wrapper
//! that is `Copy`, hashable, and cheap to pass by value) but are backed by a
//! [`Uuid`] rather than a protocol-assigned integer, since nothing outside
//! this process needs a compact wire representation for entity identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for an [`Entity`](crate::entity::Entity).
///
/// IDs are unique for the lifetime of the process and are never reused, even
/// across a player's logout/login or a mob's death/respawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EntityId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identifies a zone. Regular zones use a short human name (`"town-square"`);
/// instance zones are stamped with a generated suffix (`"dungeon-<uuid>"`) so
/// they never collide with a static zone or a sibling instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub String);

impl ZoneId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn instance(prefix: &str) -> Self {
        Self(format!("{prefix}-{}", Uuid::new_v4()))
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ZoneId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifies a wallet in the external asset ledger. Concretely, the
/// base64-encoded ed25519 public key that the wallet authenticates with
/// (see [`crate::session`]).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(pub String);

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a fungible or non-fungible token kind on the asset ledger
/// (gold is modeled separately via [`crate::ledger::GoldLedger`], not as a
/// token id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub u64);
