//! Redis-backed session store.
//!
//! Sessions are stored as JSON under `pqc:session:{id}` with a Redis TTL that
//! matches the session deadline, and each subject keeps a set of its session
//! ids so that a whole subject can be revoked at once.

use crate::identity::SubjectId;
use crate::session::clock::Clock;
use crate::session::error::{PqcError, StoreError};
use crate::session::store::SessionStore;
use crate::session::types::{Session, SessionId};
use async_trait::async_trait;
use log::{debug, info};
use redis::{AsyncCommands, Client as RedisClient};
use std::sync::Arc;

const SESSION_KEY_PREFIX: &str = "pqc:session:";
const SCAN_BATCH: usize = 100;

pub struct RedisSessionStore {
    redis_client: Arc<RedisClient>,
    clock: Arc<dyn Clock>,
}

impl RedisSessionStore {
    pub fn new(redis_client: Arc<RedisClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            redis_client,
            clock,
        }
    }

    fn session_key(&self, session_id: &SessionId) -> String {
        format!("{}{}", SESSION_KEY_PREFIX, session_id)
    }

    fn subject_sessions_key(&self, subject_id: &SubjectId) -> String {
        format!("pqc:subject:{}:sessions", subject_id)
    }

    async fn fetch(&self, session_id: &SessionId) -> Result<Option<Session>, StoreError> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let json: Option<String> = conn.get(self.session_key(session_id)).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, session: &Session) -> Result<bool, StoreError> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let session_key = self.session_key(&session.session_id);
        let subject_key = self.subject_sessions_key(&session.subject_id);

        let remaining = (session.expires_at - self.clock.now()).num_seconds().max(1);
        let json = serde_json::to_string(session)?;

        // SET NX so that an existing id is never overwritten.
        let inserted: bool = redis::cmd("SET")
            .arg(&session_key)
            .arg(json)
            .arg("NX")
            .arg("EX")
            .arg(remaining)
            .query_async(&mut conn)
            .await?;
        if !inserted {
            return Ok(false);
        }

        let _: () = conn.sadd(&subject_key, session.session_id.as_str()).await?;
        // The set may outlive individual members; it never outlives the newest one.
        let current_ttl: i64 = conn.ttl(&subject_key).await?;
        if current_ttl < remaining {
            let _: () = conn.expire(&subject_key, remaining).await?;
        }
        Ok(true)
    }

    async fn remove(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        let Some(session) = self.fetch(session_id).await? else {
            return Ok(false);
        };
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: () = conn
            .srem(
                self.subject_sessions_key(&session.subject_id),
                session_id.as_str(),
            )
            .await?;
        let deleted: usize = conn.del(self.session_key(session_id)).await?;
        Ok(deleted > 0)
    }

    async fn remove_subject(&self, subject_id: &SubjectId) -> Result<usize, StoreError> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let subject_key = self.subject_sessions_key(subject_id);

        let session_ids: Vec<String> = conn.smembers(&subject_key).await?;
        let mut removed = 0;
        for session_id in session_ids {
            let deleted: usize = conn
                .del(self.session_key(&SessionId::from(session_id)))
                .await?;
            removed += deleted;
        }
        let _: () = conn.del(&subject_key).await?;
        Ok(removed)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let pattern = format!("{}*", SESSION_KEY_PREFIX);

        let mut cursor: u64 = 0;
        let mut total = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            total += keys.len();
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(total)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, session: Session) -> Result<(), PqcError> {
        if !self.insert(&session).await? {
            return Err(PqcError::SessionIdCollision);
        }
        debug!(
            "Stored session {} for subject {} in Redis",
            session.session_id.short(),
            session.subject_id
        );
        Ok(())
    }

    async fn get_valid(&self, session_id: &SessionId) -> Result<Session, PqcError> {
        let session = self.fetch(session_id).await?.ok_or(PqcError::NotFound)?;
        // Redis TTLs have second granularity; the deadline is authoritative.
        if session.is_expired(self.clock.now()) {
            self.remove(session_id).await?;
            return Err(PqcError::NotFound);
        }
        Ok(session)
    }

    async fn invalidate(&self, session_id: &SessionId) -> Result<bool, PqcError> {
        let removed = self.remove(session_id).await?;
        if removed {
            info!("Invalidated session {}", session_id.short());
        }
        Ok(removed)
    }

    async fn invalidate_subject(&self, subject_id: &SubjectId) -> Result<usize, PqcError> {
        let removed = self.remove_subject(subject_id).await?;
        if removed > 0 {
            info!(
                "Invalidated {} sessions for subject {}",
                removed, subject_id
            );
        }
        Ok(removed)
    }

    /// Redis expires keys on its own.
    async fn sweep_expired(&self) -> Result<usize, PqcError> {
        Ok(0)
    }

    async fn active_count(&self) -> Result<usize, PqcError> {
        Ok(self.count().await?)
    }
}
