//! Protocol orchestrator: turns a KEM exchange into a step-up session.

use crate::config::PqcSettings;
use crate::identity::SubjectId;
use crate::kem::{AlgorithmDetails, KemAlgorithm, KemProvider};
use crate::session::clock::Clock;
use crate::session::error::PqcError;
use crate::session::registry::HandshakeRegistry;
use crate::session::store::{MemorySessionStore, SessionStore};
use crate::session::types::{
    HandshakeCompletion, HandshakeId, HandshakeInit, HandshakeState, PqcStats, Session, SessionId,
};
use crate::session::validator::{SessionValidator, StepUpValidator};
use hkdf::Hkdf;
use log::{debug, info, warn};
use sha2::Sha256;
use std::sync::Arc;
use zeroize::Zeroizing;

const KEY_CONFIRMATION_INFO: &[u8] = b"pqc-stepup key confirmation";
const KEY_CONFIRMATION_LEN: usize = 32;

/// Derive the tag a client uses to check that the server recovered the same
/// shared secret. Salted with the session id so tags never repeat.
pub fn key_confirmation(session_id: &SessionId, shared_secret: &[u8]) -> Result<String, PqcError> {
    let hk = Hkdf::<Sha256>::new(Some(session_id.as_str().as_bytes()), shared_secret);
    let mut okm = Zeroizing::new([0u8; KEY_CONFIRMATION_LEN]);
    hk.expand(KEY_CONFIRMATION_INFO, &mut okm[..])
        .map_err(|_| PqcError::KeyGeneration("key confirmation derivation failed".into()))?;
    Ok(hex::encode(&okm[..]))
}

/// Entry point for the handshake and session engine.
///
/// All collaborators are injected; the orchestrator owns no global state.
pub struct PqcProtocol {
    settings: PqcSettings,
    kem: Arc<dyn KemProvider>,
    registry: Arc<HandshakeRegistry>,
    sessions: Arc<dyn SessionStore>,
    validator: Arc<dyn SessionValidator>,
    clock: Arc<dyn Clock>,
}

impl PqcProtocol {
    pub fn new(
        settings: PqcSettings,
        kem: Arc<dyn KemProvider>,
        registry: Arc<HandshakeRegistry>,
        sessions: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let validator = Arc::new(StepUpValidator::new(sessions.clone()));
        Self {
            settings,
            kem,
            registry,
            sessions,
            validator,
            clock,
        }
    }

    /// Registry and session store both held in process memory.
    pub fn in_memory(
        settings: PqcSettings,
        kem: Arc<dyn KemProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(HandshakeRegistry::new(&settings, clock.clone()));
        let sessions = Arc::new(MemorySessionStore::new(clock.clone()));
        Self::new(settings, kem, registry, sessions, clock)
    }

    pub fn settings(&self) -> &PqcSettings {
        &self.settings
    }

    /// Algorithms the provider supports and the allow-list permits.
    pub fn list_algorithms(&self) -> Vec<AlgorithmDetails> {
        self.kem
            .supported_algorithms()
            .into_iter()
            .filter(|details| {
                details
                    .name
                    .parse::<KemAlgorithm>()
                    .map(|algorithm| self.settings.is_allowed(algorithm))
                    .unwrap_or(false)
            })
            .collect()
    }

    fn resolve_algorithm(&self, requested: Option<&str>) -> Result<KemAlgorithm, PqcError> {
        let algorithm = match requested {
            None => self.settings.default_algorithm,
            Some(name) => name.parse::<KemAlgorithm>()?,
        };
        if !self.settings.is_allowed(algorithm) {
            return Err(PqcError::UnsupportedAlgorithm(algorithm.to_string()));
        }
        Ok(algorithm)
    }

    /// Start a handshake for `subject_id`.
    ///
    /// `algorithm` of `None` selects the configured default.
    pub async fn handshake_init(
        &self,
        subject_id: &SubjectId,
        algorithm: Option<&str>,
    ) -> Result<HandshakeInit, PqcError> {
        debug!(
            "Handshake {} for subject {} ({})",
            HandshakeState::InitRequested,
            subject_id,
            algorithm.unwrap_or("default")
        );
        let algorithm = self.resolve_algorithm(algorithm).map_err(|e| {
            warn!("Handshake init for {} rejected: {}", subject_id, e);
            e
        })?;

        // Checked before keygen. `create` re-checks under its lock.
        let max = self.settings.max_pending_per_subject;
        self.registry.sweep_expired().await;
        let current = self.registry.pending_for_subject(subject_id).await;
        if current >= max {
            warn!(
                "Handshake init for {} rejected: {} of {} pending",
                subject_id, current, max
            );
            return Err(PqcError::TooManyPendingHandshakes { current, max });
        }

        let keypair = self.kem.keygen(algorithm).await?;
        let init = self.registry.create(subject_id, algorithm, keypair).await?;

        info!(
            "Handshake {} {} for subject {} using {}",
            init.handshake_id.short(),
            HandshakeState::Pending,
            subject_id,
            algorithm
        );
        Ok(init)
    }

    /// Finish a handshake with the caller's ciphertext and issue a session.
    pub async fn handshake_complete(
        &self,
        subject_id: &SubjectId,
        handshake_id: &HandshakeId,
        ciphertext: &[u8],
    ) -> Result<HandshakeCompletion, PqcError> {
        let mut pending = match self.registry.resolve_and_remove(handshake_id, subject_id).await {
            Ok(pending) => pending,
            Err(e) => {
                let state = if e.is_expired() {
                    HandshakeState::Expired
                } else {
                    HandshakeState::Rejected
                };
                info!(
                    "Handshake {} {}: {}",
                    handshake_id.short(),
                    state,
                    e
                );
                return Err(e);
            }
        };

        let algorithm = pending.algorithm;
        let expected = algorithm.ciphertext_len();
        if ciphertext.len() != expected {
            pending.erase_secret();
            warn!(
                "Handshake {} {}: ciphertext is {} bytes, {} expects {}",
                handshake_id.short(),
                HandshakeState::Rejected,
                ciphertext.len(),
                algorithm,
                expected
            );
            return Err(PqcError::MalformedCiphertext {
                expected,
                actual: ciphertext.len(),
            });
        }

        let decapsulated = self
            .kem
            .decapsulate(algorithm, pending.secret_key(), ciphertext)
            .await;
        pending.erase_secret();
        let shared_secret = decapsulated.map_err(|e| {
            warn!(
                "Handshake {} {}: {}",
                handshake_id.short(),
                HandshakeState::Rejected,
                e
            );
            PqcError::from(e)
        })?;

        let now = self.clock.now();
        let session = Session::new(
            subject_id.clone(),
            algorithm,
            &shared_secret,
            now,
            now + self.settings.session_ttl(),
        );
        let key_confirmation = key_confirmation(&session.session_id, &shared_secret)?;
        drop(shared_secret);

        let completion = HandshakeCompletion {
            session_id: session.session_id.clone(),
            expires_at: session.expires_at,
            key_confirmation,
        };
        self.sessions.put(session).await?;

        info!(
            "Handshake {} {}: session {} for subject {} until {}",
            handshake_id.short(),
            HandshakeState::Completed,
            completion.session_id.short(),
            subject_id,
            completion.expires_at
        );
        Ok(completion)
    }

    /// Check a presented session id against the caller's subject.
    pub async fn validate_session(
        &self,
        subject_id: &SubjectId,
        session_id: &SessionId,
    ) -> Result<Session, PqcError> {
        self.validator.validate(subject_id, session_id).await
    }

    /// Revoke one session. Only its owner may do so.
    pub async fn revoke_session(
        &self,
        subject_id: &SubjectId,
        session_id: &SessionId,
    ) -> Result<(), PqcError> {
        let session = self.sessions.get_valid(session_id).await?;
        if session.subject_id != *subject_id {
            warn!(
                "Subject {} tried to revoke session {} of {}",
                subject_id,
                session_id.short(),
                session.subject_id
            );
            return Err(PqcError::SubjectMismatch);
        }
        self.sessions.invalidate(session_id).await?;
        Ok(())
    }

    /// Revoke every session of a subject, e.g. after a credential change.
    pub async fn revoke_subject(&self, subject_id: &SubjectId) -> Result<usize, PqcError> {
        self.sessions.invalidate_subject(subject_id).await
    }

    /// Live counts. Expired entries are purged first so they are never counted.
    pub async fn stats(&self) -> Result<PqcStats, PqcError> {
        self.sweep().await?;
        Ok(PqcStats {
            pending_handshakes: self.registry.pending_count().await,
            active_sessions: self.sessions.active_count().await?,
        })
    }

    /// Purge expired handshakes and sessions. Returns the total removed.
    pub async fn sweep(&self) -> Result<usize, PqcError> {
        let handshakes = self.registry.sweep_expired().await;
        let sessions = self.sessions.sweep_expired().await?;
        if handshakes + sessions > 0 {
            debug!(
                "Sweep removed {} handshakes and {} sessions",
                handshakes, sessions
            );
        }
        Ok(handshakes + sessions)
    }
}
