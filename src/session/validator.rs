//! Step-up session validation.
//!
//! Guards sensitive operations: the caller must present a session id that is
//! live and bound to the subject of their identity token.

use crate::identity::SubjectId;
use crate::session::error::PqcError;
use crate::session::store::SessionStore;
use crate::session::types::{Session, SessionId};
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;

/// Trait for session validation.
///
/// Abstracted so that guarded handlers can be tested with a mock.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Return the session when it exists, has not expired and belongs to
    /// `subject_id`.
    async fn validate(
        &self,
        subject_id: &SubjectId,
        session_id: &SessionId,
    ) -> Result<Session, PqcError>;
}

/// Validator backed by a [`SessionStore`].
pub struct StepUpValidator {
    sessions: Arc<dyn SessionStore>,
}

impl StepUpValidator {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl SessionValidator for StepUpValidator {
    async fn validate(
        &self,
        subject_id: &SubjectId,
        session_id: &SessionId,
    ) -> Result<Session, PqcError> {
        let session = match self.sessions.get_valid(session_id).await {
            Ok(session) => session,
            Err(PqcError::NotFound) => {
                debug!("No live session {}", session_id.short());
                return Err(PqcError::NoValidSession);
            }
            Err(e) => return Err(e),
        };

        if session.subject_id != *subject_id {
            warn!(
                "Session {} presented by {} but bound to {}",
                session_id.short(),
                subject_id,
                session.subject_id
            );
            return Err(PqcError::SubjectMismatch);
        }

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kem::KemAlgorithm;
    use crate::session::clock::ManualClock;
    use crate::session::error::{ErrorKind, StoreError};
    use crate::session::store::MemorySessionStore;
    use crate::session::clock::Clock;
    use chrono::Duration;

    struct BrokenStore;

    #[async_trait]
    impl SessionStore for BrokenStore {
        async fn put(&self, _session: Session) -> Result<(), PqcError> {
            Err(StoreError::Redis("down".into()).into())
        }
        async fn get_valid(&self, _session_id: &SessionId) -> Result<Session, PqcError> {
            Err(StoreError::Redis("down".into()).into())
        }
        async fn invalidate(&self, _session_id: &SessionId) -> Result<bool, PqcError> {
            Ok(false)
        }
        async fn invalidate_subject(&self, _subject_id: &SubjectId) -> Result<usize, PqcError> {
            Ok(0)
        }
        async fn sweep_expired(&self) -> Result<usize, PqcError> {
            Ok(0)
        }
        async fn active_count(&self) -> Result<usize, PqcError> {
            Ok(0)
        }
    }

    async fn store_with_session(
        clock: Arc<ManualClock>,
        subject: &str,
    ) -> (Arc<MemorySessionStore>, SessionId) {
        let store = Arc::new(MemorySessionStore::new(clock.clone()));
        let now = clock.now();
        let session = Session::new(
            SubjectId::from(subject),
            KemAlgorithm::MlKem768,
            b"secret",
            now,
            now + Duration::seconds(300),
        );
        let id = session.session_id.clone();
        store.put(session).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_owner_passes() {
        let clock = Arc::new(ManualClock::default());
        let (store, id) = store_with_session(clock, "u1").await;
        let validator = StepUpValidator::new(store);

        let session = validator.validate(&SubjectId::from("u1"), &id).await.unwrap();
        assert_eq!(session.session_id, id);
    }

    #[tokio::test]
    async fn test_other_subject_rejected() {
        let clock = Arc::new(ManualClock::default());
        let (store, id) = store_with_session(clock, "u1").await;
        let validator = StepUpValidator::new(store);

        let err = validator
            .validate(&SubjectId::from("u2"), &id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SubjectMismatch);
    }

    #[tokio::test]
    async fn test_missing_and_expired_sessions() {
        let clock = Arc::new(ManualClock::default());
        let (store, id) = store_with_session(clock.clone(), "u1").await;
        let validator = StepUpValidator::new(store);
        let u1 = SubjectId::from("u1");

        let err = validator
            .validate(&u1, &SessionId::from("ss_unknown"))
            .await
            .unwrap_err();
        assert!(matches!(err, PqcError::NoValidSession));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        clock.advance(Duration::seconds(301));
        let err = validator.validate(&u1, &id).await.unwrap_err();
        assert!(matches!(err, PqcError::NoValidSession));
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let validator = StepUpValidator::new(Arc::new(BrokenStore));
        let err = validator
            .validate(&SubjectId::from("u1"), &SessionId::from("ss_x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
