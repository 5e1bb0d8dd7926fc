//! Registry of in-flight handshakes.
//!
//! Each entry owns a KEM secret key until the caller comes back with a
//! ciphertext. Entries are single-use: `resolve_and_remove` takes the entry
//! out under the lock, so of any number of racing completions only one ever
//! sees it.

use crate::config::PqcSettings;
use crate::identity::SubjectId;
use crate::kem::{KemAlgorithm, KemKeyPair};
use crate::session::clock::Clock;
use crate::session::error::PqcError;
use crate::session::types::{HandshakeId, HandshakeInit, PendingHandshake};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<HandshakeId, PendingHandshake>,
    /// Ordered by deadline so a sweep only touches what has expired.
    expiry_index: BTreeSet<(DateTime<Utc>, HandshakeId)>,
    per_subject: HashMap<SubjectId, usize>,
}

impl RegistryInner {
    fn take(&mut self, handshake_id: &HandshakeId) -> Option<PendingHandshake> {
        let pending = self.entries.remove(handshake_id)?;
        self.expiry_index
            .remove(&(pending.expires_at, pending.handshake_id.clone()));
        self.release_slot(&pending.subject_id);
        Some(pending)
    }

    fn release_slot(&mut self, subject_id: &SubjectId) {
        if let Some(count) = self.per_subject.get_mut(subject_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_subject.remove(subject_id);
            }
        }
    }

    /// Remove every entry whose deadline is strictly before `now`.
    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        while let Some((expires_at, _)) = self.expiry_index.first() {
            if *expires_at >= now {
                break;
            }
            if let Some((_, handshake_id)) = self.expiry_index.pop_first() {
                if let Some(pending) = self.entries.remove(&handshake_id) {
                    self.release_slot(&pending.subject_id);
                    removed += 1;
                }
            }
        }
        removed
    }
}

/// In-memory registry of pending handshakes.
pub struct HandshakeRegistry {
    inner: Mutex<RegistryInner>,
    clock: Arc<dyn Clock>,
    handshake_ttl: Duration,
    max_pending_per_subject: usize,
}

impl HandshakeRegistry {
    pub fn new(settings: &PqcSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            clock,
            handshake_ttl: settings.handshake_ttl(),
            max_pending_per_subject: settings.max_pending_per_subject,
        }
    }

    /// Store a freshly generated keypair as a pending handshake.
    ///
    /// The keypair must already exist: key generation happens outside the
    /// registry lock.
    pub async fn create(
        &self,
        subject_id: &SubjectId,
        algorithm: KemAlgorithm,
        keypair: KemKeyPair,
    ) -> Result<HandshakeInit, PqcError> {
        let now = self.clock.now();
        let expires_at = now + self.handshake_ttl;
        let KemKeyPair {
            public_key,
            secret_key,
        } = keypair;

        let pending = PendingHandshake::new(
            subject_id.clone(),
            algorithm,
            public_key,
            secret_key,
            now,
            expires_at,
        );
        let handshake_id = pending.handshake_id.clone();
        let init = HandshakeInit {
            handshake_id: handshake_id.clone(),
            algorithm,
            public_key: pending.public_key.clone(),
            expires_at,
        };

        let mut inner = self.inner.lock().await;
        // Expired entries must not count against the subject's quota.
        inner.sweep(now);

        let current = inner.per_subject.get(subject_id).copied().unwrap_or(0);
        if current >= self.max_pending_per_subject {
            warn!(
                "Subject {} already has {} pending handshakes",
                subject_id, current
            );
            return Err(PqcError::TooManyPendingHandshakes {
                current,
                max: self.max_pending_per_subject,
            });
        }

        inner
            .expiry_index
            .insert((expires_at, handshake_id.clone()));
        inner.entries.insert(handshake_id.clone(), pending);
        *inner.per_subject.entry(subject_id.clone()).or_insert(0) += 1;
        drop(inner);

        debug!(
            "Registered handshake {} for subject {} ({}), expires {}",
            handshake_id.short(),
            subject_id,
            algorithm,
            expires_at
        );
        Ok(init)
    }

    /// Atomically take a pending handshake out of the registry.
    ///
    /// The entry is gone after this call whatever the outcome, so a second
    /// attempt always yields `NotFound`.
    pub async fn resolve_and_remove(
        &self,
        handshake_id: &HandshakeId,
        subject_id: &SubjectId,
    ) -> Result<PendingHandshake, PqcError> {
        let now = self.clock.now();
        let pending = {
            let mut inner = self.inner.lock().await;
            inner.take(handshake_id)
        }
        .ok_or(PqcError::NotFound)?;

        if pending.is_expired(now) {
            info!(
                "Handshake {} expired at {}, discarded",
                handshake_id.short(),
                pending.expires_at
            );
            return Err(PqcError::Expired {
                expired_at: pending.expires_at,
            });
        }

        if pending.subject_id != *subject_id {
            warn!(
                "Handshake {} presented by {} but owned by {}, discarded",
                handshake_id.short(),
                subject_id,
                pending.subject_id
            );
            return Err(PqcError::SubjectMismatch);
        }

        Ok(pending)
    }

    /// Purge entries past their deadline. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let removed = self.inner.lock().await.sweep(now);
        if removed > 0 {
            debug!("Swept {} expired handshakes", removed);
        }
        removed
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn pending_for_subject(&self, subject_id: &SubjectId) -> usize {
        self.inner
            .lock()
            .await
            .per_subject
            .get(subject_id)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::clock::ManualClock;
    use zeroize::Zeroizing;

    fn keypair() -> KemKeyPair {
        KemKeyPair {
            public_key: vec![7u8; 16],
            secret_key: Zeroizing::new(vec![9u8; 32]),
        }
    }

    fn registry(max_pending: usize) -> (HandshakeRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let settings = PqcSettings {
            max_pending_per_subject: max_pending,
            ..PqcSettings::default()
        };
        (HandshakeRegistry::new(&settings, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_create_then_resolve_once() {
        let (registry, _clock) = registry(5);
        let u1 = SubjectId::from("u1");

        let init = registry
            .create(&u1, KemAlgorithm::MlKem768, keypair())
            .await
            .unwrap();
        assert_eq!(init.public_key, vec![7u8; 16]);
        assert_eq!(registry.pending_count().await, 1);

        let pending = registry
            .resolve_and_remove(&init.handshake_id, &u1)
            .await
            .unwrap();
        assert_eq!(pending.secret_key(), &[9u8; 32][..]);
        assert_eq!(registry.pending_count().await, 0);

        let again = registry.resolve_and_remove(&init.handshake_id, &u1).await;
        assert!(matches!(again, Err(PqcError::NotFound)));
    }

    #[tokio::test]
    async fn test_subject_mismatch_discards_entry() {
        let (registry, _clock) = registry(5);
        let u1 = SubjectId::from("u1");
        let u2 = SubjectId::from("u2");

        let init = registry
            .create(&u1, KemAlgorithm::MlKem512, keypair())
            .await
            .unwrap();
        let result = registry.resolve_and_remove(&init.handshake_id, &u2).await;
        assert!(matches!(result, Err(PqcError::SubjectMismatch)));

        let result = registry.resolve_and_remove(&init.handshake_id, &u1).await;
        assert!(matches!(result, Err(PqcError::NotFound)));
        assert_eq!(registry.pending_for_subject(&u1).await, 0);
    }

    #[tokio::test]
    async fn test_expired_entry_reports_expired_then_not_found() {
        let (registry, clock) = registry(5);
        let u1 = SubjectId::from("u1");

        let init = registry
            .create(&u1, KemAlgorithm::MlKem768, keypair())
            .await
            .unwrap();
        clock.advance(Duration::seconds(121));

        let result = registry.resolve_and_remove(&init.handshake_id, &u1).await;
        assert!(matches!(result, Err(PqcError::Expired { .. })));

        let result = registry.resolve_and_remove(&init.handshake_id, &u1).await;
        assert!(matches!(result, Err(PqcError::NotFound)));
    }

    #[tokio::test]
    async fn test_deadline_is_inclusive() {
        let (registry, clock) = registry(5);
        let u1 = SubjectId::from("u1");

        let init = registry
            .create(&u1, KemAlgorithm::MlKem768, keypair())
            .await
            .unwrap();
        clock.advance(Duration::seconds(120));

        assert!(registry
            .resolve_and_remove(&init.handshake_id, &u1)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_sweep_only_removes_expired() {
        let (registry, clock) = registry(5);
        let u1 = SubjectId::from("u1");

        registry
            .create(&u1, KemAlgorithm::MlKem768, keypair())
            .await
            .unwrap();
        clock.advance(Duration::seconds(60));
        let fresh = registry
            .create(&u1, KemAlgorithm::MlKem768, keypair())
            .await
            .unwrap();

        clock.advance(Duration::seconds(61));
        assert_eq!(registry.sweep_expired().await, 1);
        assert_eq!(registry.pending_count().await, 1);
        assert_eq!(registry.pending_for_subject(&u1).await, 1);

        assert!(registry
            .resolve_and_remove(&fresh.handshake_id, &u1)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_pending_limit_per_subject() {
        let (registry, clock) = registry(2);
        let u1 = SubjectId::from("u1");
        let u2 = SubjectId::from("u2");

        for _ in 0..2 {
            registry
                .create(&u1, KemAlgorithm::MlKem512, keypair())
                .await
                .unwrap();
        }
        let result = registry.create(&u1, KemAlgorithm::MlKem512, keypair()).await;
        assert!(matches!(
            result,
            Err(PqcError::TooManyPendingHandshakes { current: 2, max: 2 })
        ));

        // Other subjects are unaffected.
        assert!(registry
            .create(&u2, KemAlgorithm::MlKem512, keypair())
            .await
            .is_ok());

        // Once the old entries expire the slot frees up.
        clock.advance(Duration::seconds(121));
        assert!(registry
            .create(&u1, KemAlgorithm::MlKem512, keypair())
            .await
            .is_ok());
        assert_eq!(registry.pending_for_subject(&u1).await, 1);
    }
}
