//! Error types for the step-up handshake and session engine.

use crate::identity::AuthError;
use crate::kem::KemError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the registry, the session store, the validator and the
/// protocol orchestrator.
#[derive(Debug, Error)]
pub enum PqcError {
    #[error("KEM algorithm '{0}' is not available")]
    UnsupportedAlgorithm(String),

    #[error("Handshake or session not found")]
    NotFound,

    #[error("Handshake expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },

    #[error("Subject does not own this handshake or session")]
    SubjectMismatch,

    #[error("Malformed ciphertext: expected {expected} bytes, got {actual}")]
    MalformedCiphertext { expected: usize, actual: usize },

    #[error("Decapsulation failed: {0}")]
    DecapsulationFailed(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Valid PQC session required for this operation")]
    NoValidSession,

    #[error("Too many pending handshakes: {current}/{max}")]
    TooManyPendingHandshakes { current: usize, max: usize },

    #[error("Session id already in use")]
    SessionIdCollision,

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from a session store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis operation failed: {0}")]
    Redis(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Redis(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<KemError> for PqcError {
    fn from(e: KemError) -> Self {
        match e {
            KemError::UnsupportedAlgorithm(name) => PqcError::UnsupportedAlgorithm(name),
            KemError::KeyGeneration(reason) | KemError::Encapsulation(reason) => {
                PqcError::KeyGeneration(reason)
            }
            KemError::Decapsulation(reason) => PqcError::DecapsulationFailed(reason),
        }
    }
}

/// Error kind as seen by callers outside the engine.
///
/// `Expired` and `NoValidSession` fold into `NotFound` so that a caller can
/// not tell a stale id from one that never existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedAlgorithm,
    NotFound,
    SubjectMismatch,
    MalformedCiphertext,
    DecapsulationFailed,
    AuthError,
    TooManyPendingHandshakes,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedAlgorithm => "unsupported_algorithm",
            ErrorKind::NotFound => "not_found",
            ErrorKind::SubjectMismatch => "subject_mismatch",
            ErrorKind::MalformedCiphertext => "malformed_ciphertext",
            ErrorKind::DecapsulationFailed => "decapsulation_failed",
            ErrorKind::AuthError => "authentication_failed",
            ErrorKind::TooManyPendingHandshakes => "too_many_pending_handshakes",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl PqcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PqcError::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            PqcError::NotFound | PqcError::Expired { .. } | PqcError::NoValidSession => {
                ErrorKind::NotFound
            }
            PqcError::SubjectMismatch => ErrorKind::SubjectMismatch,
            PqcError::MalformedCiphertext { .. } => ErrorKind::MalformedCiphertext,
            PqcError::DecapsulationFailed(_) => ErrorKind::DecapsulationFailed,
            PqcError::Auth(_) => ErrorKind::AuthError,
            PqcError::TooManyPendingHandshakes { .. } => ErrorKind::TooManyPendingHandshakes,
            PqcError::KeyGeneration(_) | PqcError::SessionIdCollision | PqcError::Store(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// True for the expiry class (internal distinction only).
    pub fn is_expired(&self) -> bool {
        matches!(self, PqcError::Expired { .. })
    }
}
