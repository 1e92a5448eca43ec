//! Challenge-response authentication and the bearer-credential session store
//! (SPEC_FULL.md §4.10).
//!
//! A wallet is its base64-encoded ed25519 public key; `signature` is a
//! detached ed25519 signature over the exact challenge message bytes. This
//! is grounded on the pack's blockchain-node example (`r3e-network-neo-rs`,
//! which depends on `ed25519-dalek` to verify client-submitted signatures)
//! rather than on the teacher, which authenticates against Mojang's session
//! server instead of a wallet keypair.

use std::collections::HashMap;

use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::chrono_like::now_millis;
use crate::ids::WalletId;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown wallet encoding: {0}")]
    InvalidWallet(String),
    #[error("no outstanding challenge for this wallet")]
    NoChallenge,
    #[error("challenge timestamp outside the freshness window")]
    StaleTimestamp,
    #[error("signature verification failed")]
    BadSignature,
    #[error("session token is missing or expired")]
    ExpiredOrMissing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub message: String,
    pub timestamp: i64,
}

struct SessionRecord {
    wallet: WalletId,
    expires_at_ms: i64,
}

pub struct SessionStore {
    /// Outstanding issued challenges, keyed by wallet, so `verify` knows
    /// exactly what message should have been signed.
    challenges: Mutex<HashMap<WalletId, Challenge>>,
    sessions: Mutex<HashMap<String, SessionRecord>>,
    freshness_window_secs: i64,
    ttl_hours: i64,
}

impl SessionStore {
    pub fn new(freshness_window_secs: i64, ttl_hours: i64) -> Self {
        Self {
            challenges: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            freshness_window_secs,
            ttl_hours,
        }
    }

    /// Issues a fresh challenge bound to `wallet`, replacing any prior
    /// outstanding challenge for the same wallet.
    pub fn issue_challenge(&self, wallet: &WalletId) -> Challenge {
        let timestamp = now_millis();
        let nonce = Uuid::new_v4();
        let challenge = Challenge {
            message: format!("wyrmshard-auth:{wallet}:{timestamp}:{nonce}"),
            timestamp,
        };
        self.challenges.lock().insert(wallet.clone(), challenge.clone());
        challenge
    }

    /// Verifies `signature` over the outstanding challenge for `wallet`,
    /// checks the timestamp freshness window, and on success issues a
    /// bearer token with a [`Self::ttl_hours`] TTL.
    pub fn verify(
        &self,
        wallet: &WalletId,
        signature_b64: &str,
        claimed_timestamp: i64,
    ) -> Result<(String, i64), SessionError> {
        let now = now_millis();
        if (now - claimed_timestamp).abs() > self.freshness_window_secs * 1000 {
            return Err(SessionError::StaleTimestamp);
        }

        let challenge = {
            let challenges = self.challenges.lock();
            challenges.get(wallet).cloned().ok_or(SessionError::NoChallenge)?
        };
        if challenge.timestamp != claimed_timestamp {
            return Err(SessionError::NoChallenge);
        }

        let verifying_key = decode_wallet_key(wallet)?;
        let sig_bytes = base64::engine::general_purpose::STANDARD
            .decode(signature_b64)
            .map_err(|_| SessionError::BadSignature)?;
        let signature = Signature::from_slice(&sig_bytes).map_err(|_| SessionError::BadSignature)?;
        verifying_key
            .verify(challenge.message.as_bytes(), &signature)
            .map_err(|_| SessionError::BadSignature)?;

        self.challenges.lock().remove(wallet);

        let token = format!("{}", Uuid::new_v4());
        let expires_in_ms = self.ttl_hours * 3_600_000;
        self.sessions.lock().insert(
            token.clone(),
            SessionRecord {
                wallet: wallet.clone(),
                expires_at_ms: now + expires_in_ms,
            },
        );
        Ok((token, expires_in_ms / 1000))
    }

    /// Resolves a bearer token to its wallet, rejecting expired tokens.
    pub fn resolve(&self, token: &str) -> Result<WalletId, SessionError> {
        let mut sessions = self.sessions.lock();
        match sessions.get(token) {
            Some(record) if record.expires_at_ms >= now_millis() => Ok(record.wallet.clone()),
            Some(_) => {
                sessions.remove(token);
                Err(SessionError::ExpiredOrMissing)
            }
            None => Err(SessionError::ExpiredOrMissing),
        }
    }
}

fn decode_wallet_key(wallet: &WalletId) -> Result<VerifyingKey, SessionError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&wallet.0)
        .map_err(|e| SessionError::InvalidWallet(e.to_string()))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SessionError::InvalidWallet("expected 32-byte ed25519 public key".into()))?;
    VerifyingKey::from_bytes(&arr).map_err(|e| SessionError::InvalidWallet(e.to_string()))
}

/// Encodes a wallet id from a raw ed25519 verifying key. Used by tests and
/// by any out-of-band wallet-creation tooling; the shard itself never mints
/// keys, only verifies signatures against them.
pub fn wallet_id_from_key(key: &VerifyingKey) -> WalletId {
    WalletId(base64::engine::general_purpose::STANDARD.encode(key.as_bytes()))
}

/// Test/dev helper: generates a fresh ed25519 keypair and its wallet id.
pub fn generate_wallet_keypair() -> (ed25519_dalek::SigningKey, WalletId) {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
    let wallet = wallet_id_from_key(&signing_key.verifying_key());
    (signing_key, wallet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Signer;

    #[test]
    fn full_challenge_response_round_trip_issues_token() {
        let (signing_key, wallet) = generate_wallet_keypair();
        let store = SessionStore::new(300, 24);
        let challenge = store.issue_challenge(&wallet);
        let signature = signing_key.sign(challenge.message.as_bytes());
        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());

        let (token, expires_in) = store.verify(&wallet, &sig_b64, challenge.timestamp).unwrap();
        assert_eq!(expires_in, 24 * 3600);
        assert_eq!(store.resolve(&token).unwrap(), wallet);
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let (signing_key, wallet) = generate_wallet_keypair();
        let store = SessionStore::new(300, 24);
        let challenge = store.issue_challenge(&wallet);
        let signature = signing_key.sign(challenge.message.as_bytes());
        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());

        let ancient = challenge.timestamp - 10 * 60 * 1000;
        let err = store.verify(&wallet, &sig_b64, ancient).unwrap_err();
        assert!(matches!(err, SessionError::StaleTimestamp));
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let (_signing_key, wallet) = generate_wallet_keypair();
        let (other_signing_key, _other_wallet) = generate_wallet_keypair();
        let store = SessionStore::new(300, 24);
        let challenge = store.issue_challenge(&wallet);
        let bad_signature = other_signing_key.sign(challenge.message.as_bytes());
        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(bad_signature.to_bytes());

        let err = store.verify(&wallet, &sig_b64, challenge.timestamp).unwrap_err();
        assert!(matches!(err, SessionError::BadSignature));
    }

    #[test]
    fn unknown_token_is_rejected() {
        let store = SessionStore::new(300, 24);
        assert!(matches!(
            store.resolve("not-a-real-token"),
            Err(SessionError::ExpiredOrMissing)
        ));
    }
}
