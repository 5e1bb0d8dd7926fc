//! Session store seam and the in-memory backend.

use crate::identity::SubjectId;
use crate::session::clock::Clock;
use crate::session::error::PqcError;
use crate::session::types::{Session, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Storage for established step-up sessions.
///
/// Every operation is internally synchronized; callers never coordinate
/// locking themselves.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session. An id that is already present is a logic error
    /// and yields `SessionIdCollision`.
    async fn put(&self, session: Session) -> Result<(), PqcError>;

    /// The session if present and not past its deadline, else `NotFound`.
    async fn get_valid(&self, session_id: &SessionId) -> Result<Session, PqcError>;

    /// Remove one session. Returns whether it existed.
    async fn invalidate(&self, session_id: &SessionId) -> Result<bool, PqcError>;

    /// Remove every session bound to `subject_id`.
    async fn invalidate_subject(&self, subject_id: &SubjectId) -> Result<usize, PqcError>;

    /// Purge expired sessions. Returns how many were removed.
    async fn sweep_expired(&self) -> Result<usize, PqcError>;

    async fn active_count(&self) -> Result<usize, PqcError>;
}

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<SessionId, Session>,
    expiry_index: BTreeSet<(DateTime<Utc>, SessionId)>,
}

impl StoreInner {
    fn remove(&mut self, session_id: &SessionId) -> Option<Session> {
        let session = self.sessions.remove(session_id)?;
        self.expiry_index
            .remove(&(session.expires_at, session.session_id.clone()));
        Some(session)
    }

    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        while let Some((expires_at, _)) = self.expiry_index.first() {
            if *expires_at >= now {
                break;
            }
            if let Some((_, session_id)) = self.expiry_index.pop_first() {
                if self.sessions.remove(&session_id).is_some() {
                    removed += 1;
                }
            }
        }
        removed
    }
}

/// Process-local session store.
pub struct MemorySessionStore {
    inner: Mutex<StoreInner>,
    clock: Arc<dyn Clock>,
}

impl MemorySessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            clock,
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, session: Session) -> Result<(), PqcError> {
        let mut inner = self.inner.lock().await;
        if inner.sessions.contains_key(&session.session_id) {
            return Err(PqcError::SessionIdCollision);
        }
        inner
            .expiry_index
            .insert((session.expires_at, session.session_id.clone()));
        inner.sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn get_valid(&self, session_id: &SessionId) -> Result<Session, PqcError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        let expired = match inner.sessions.get(session_id) {
            None => return Err(PqcError::NotFound),
            Some(session) if !session.is_expired(now) => return Ok(session.clone()),
            Some(_) => true,
        };
        if expired {
            inner.remove(session_id);
            debug!("Session {} expired, purged on access", session_id.short());
        }
        Err(PqcError::NotFound)
    }

    async fn invalidate(&self, session_id: &SessionId) -> Result<bool, PqcError> {
        let removed = self.inner.lock().await.remove(session_id).is_some();
        if removed {
            info!("Invalidated session {}", session_id.short());
        }
        Ok(removed)
    }

    async fn invalidate_subject(&self, subject_id: &SubjectId) -> Result<usize, PqcError> {
        let mut inner = self.inner.lock().await;
        let doomed: Vec<SessionId> = inner
            .sessions
            .values()
            .filter(|s| s.subject_id == *subject_id)
            .map(|s| s.session_id.clone())
            .collect();
        for session_id in &doomed {
            inner.remove(session_id);
        }
        drop(inner);

        if !doomed.is_empty() {
            info!(
                "Invalidated {} sessions for subject {}",
                doomed.len(),
                subject_id
            );
        }
        Ok(doomed.len())
    }

    async fn sweep_expired(&self) -> Result<usize, PqcError> {
        let now = self.clock.now();
        Ok(self.inner.lock().await.sweep(now))
    }

    async fn active_count(&self) -> Result<usize, PqcError> {
        Ok(self.inner.lock().await.sessions.len())
    }
}
