//! Step-up handshake and session engine.
//!
//! A caller already identified by a classical token runs a KEM handshake to
//! obtain a short-lived session that is bound to the same subject. Sensitive
//! operations then require both.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  keygen / decapsulate  ┌──────────────────┐
//! │ KemProvider │◀───────────────────────│   PqcProtocol    │
//! │   (trait)   │                        │  (orchestrator)  │
//! └─────────────┘                        └──────────────────┘
//!                                          │             │
//!                       create / resolve   │             │  put / get_valid
//!                                          ▼             ▼
//!                          ┌───────────────────┐   ┌──────────────┐
//!                          │ HandshakeRegistry │   │ SessionStore │
//!                          │   (hs_ ids, TTL)  │   │ memory/redis │
//!                          └───────────────────┘   └──────────────┘
//!                                                        ▲
//!                                                        │
//!                                               ┌─────────────────┐
//!                                               │ SessionValidator│
//!                                               │    (trait)      │
//!                                               └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use pqc_stepup::session::{PqcProtocol, SystemClock};
//! use pqc_stepup::kem::MlKemProvider;
//!
//! let protocol = PqcProtocol::in_memory(settings, Arc::new(MlKemProvider::new()), Arc::new(SystemClock));
//!
//! let init = protocol.handshake_init(&subject, Some("ML-KEM-768")).await?;
//! // client encapsulates to init.public_key and returns the ciphertext
//! let done = protocol.handshake_complete(&subject, &init.handshake_id, &ciphertext).await?;
//!
//! // later, before a sensitive operation
//! protocol.validate_session(&subject, &done.session_id).await?;
//! ```

pub mod clock;
pub mod error;
pub mod orchestrator;
pub mod redis_store;
pub mod registry;
pub mod store;
pub mod sweeper;
pub mod types;
pub mod validator;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, PqcError, StoreError};
pub use orchestrator::{key_confirmation, PqcProtocol};
pub use redis_store::RedisSessionStore;
pub use registry::HandshakeRegistry;
pub use store::{MemorySessionStore, SessionStore};
pub use sweeper::spawn_sweeper;
pub use types::{
    HandshakeCompletion, HandshakeId, HandshakeInit, HandshakeState, PendingHandshake, PqcStats,
    Session, SessionId,
};
pub use validator::{SessionValidator, StepUpValidator};
