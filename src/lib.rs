//! Post-quantum step-up authentication.
//!
//! A classical bearer token says who the caller is; a short-lived session
//! established through an ML-KEM handshake proves recent, fresh interaction
//! with that same subject before sensitive operations are allowed.

// Environment-driven server settings
pub mod config;

// axum routes and extractors
pub mod http;

// Bearer identity verification
pub mod identity;

// KEM capability and the ML-KEM provider
pub mod kem;

// Handshake registry, session store, validator and orchestrator
pub mod session;

pub use config::{load_config, ConfigError, PqcSettings, ServerSettings};
pub use identity::{AuthError, IdentityVerifier, JwtIdentityVerifier, SubjectId};
pub use kem::{AlgorithmDetails, KemAlgorithm, KemError, KemProvider, MlKemProvider};
pub use session::{
    ErrorKind, HandshakeCompletion, HandshakeId, HandshakeInit, PqcError, PqcProtocol, Session,
    SessionId, SessionValidator,
};
