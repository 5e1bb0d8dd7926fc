//! Types for the step-up handshake and session engine.

use crate::identity::SubjectId;
use crate::kem::{KemAlgorithm, SecretKeyBytes};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroize;

/// Random bytes behind every handshake and session id.
const TOKEN_ENTROPY_BYTES: usize = 32;

const HANDSHAKE_ID_PREFIX: &str = "hs_";
const SESSION_ID_PREFIX: &str = "ss_";

fn random_token(prefix: &str) -> String {
    let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", prefix, URL_SAFE_NO_PAD.encode(bytes))
}

/// Log-safe abbreviation of an id.
fn short(id: &str) -> &str {
    let end = id.char_indices().nth(11).map(|(i, _)| i).unwrap_or(id.len());
    &id[..end]
}

/// Opaque identifier of a pending handshake (`hs_` + 256 random bits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandshakeId(String);

impl HandshakeId {
    pub fn generate() -> Self {
        Self(random_token(HANDSHAKE_ID_PREFIX))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        short(&self.0)
    }
}

impl fmt::Display for HandshakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for HandshakeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for HandshakeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Opaque identifier of a step-up session (`ss_` + 256 random bits).
///
/// The prefix keeps session ids disjoint from handshake ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(random_token(SESSION_ID_PREFIX))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        short(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Handshake lifecycle. `Pending` is the only state that occupies storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    InitRequested,
    Pending,
    Completed,
    Expired,
    Rejected,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::InitRequested => "INIT_REQUESTED",
            HandshakeState::Pending => "PENDING",
            HandshakeState::Completed => "COMPLETED",
            HandshakeState::Expired => "EXPIRED",
            HandshakeState::Rejected => "REJECTED",
        };
        f.write_str(name)
    }
}

/// A handshake waiting for the caller's ciphertext.
///
/// Holds the KEM secret key; it is not serializable and its `Debug` output
/// is redacted. The key is wiped when the entry is dropped.
pub struct PendingHandshake {
    pub handshake_id: HandshakeId,
    pub subject_id: SubjectId,
    pub algorithm: KemAlgorithm,
    pub public_key: Vec<u8>,
    secret_key: SecretKeyBytes,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingHandshake {
    pub fn new(
        subject_id: SubjectId,
        algorithm: KemAlgorithm,
        public_key: Vec<u8>,
        secret_key: SecretKeyBytes,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            handshake_id: HandshakeId::generate(),
            subject_id,
            algorithm,
            public_key,
            secret_key,
            created_at,
            expires_at,
        }
    }

    pub fn secret_key(&self) -> &[u8] {
        &self.secret_key
    }

    /// Zero the secret key in place. Idempotent.
    pub fn erase_secret(&mut self) {
        self.secret_key.zeroize();
    }

    pub fn is_secret_erased(&self) -> bool {
        self.secret_key.iter().all(|b| *b == 0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

impl fmt::Debug for PendingHandshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingHandshake")
            .field("handshake_id", &self.handshake_id.short())
            .field("subject_id", &self.subject_id)
            .field("algorithm", &self.algorithm)
            .field("secret_key", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Established step-up session.
///
/// The raw shared secret is not kept; only its SHA-256 fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub subject_id: SubjectId,
    pub algorithm: KemAlgorithm,
    /// Hex SHA-256 of the decapsulated shared secret.
    pub secret_fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        subject_id: SubjectId,
        algorithm: KemAlgorithm,
        shared_secret: &[u8],
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: SessionId::generate(),
            subject_id,
            algorithm,
            secret_fingerprint: hex::encode(Sha256::digest(shared_secret)),
            created_at,
            expires_at,
        }
    }

    /// Valid through `expires_at` inclusive.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Result of `handshake_init`. Safe to hand to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct HandshakeInit {
    pub handshake_id: HandshakeId,
    pub algorithm: KemAlgorithm,
    pub public_key: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successful `handshake_complete`.
#[derive(Debug, Clone, Serialize)]
pub struct HandshakeCompletion {
    pub session_id: SessionId,
    pub expires_at: DateTime<Utc>,
    /// Hex HKDF tag over the shared secret, lets the client confirm that
    /// both sides hold the same secret.
    pub key_confirmation: String,
}

/// Counts for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PqcStats {
    pub pending_handshakes: usize,
    pub active_sessions: usize,
}
