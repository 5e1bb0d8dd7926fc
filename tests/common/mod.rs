#![allow(dead_code)]

use async_trait::async_trait;
use pqc_stepup::config::PqcSettings;
use pqc_stepup::identity::SubjectId;
use pqc_stepup::kem::{
    AlgorithmDetails, KemAlgorithm, KemError, KemKeyPair, KemProvider, MlKemProvider, SharedSecret,
};
use pqc_stepup::session::{HandshakeCompletion, HandshakeInit, ManualClock, PqcProtocol};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// ML-KEM provider that counts calls.
#[derive(Default)]
pub struct CountingKem {
    inner: MlKemProvider,
    keygens: AtomicUsize,
    decapsulations: AtomicUsize,
}

impl CountingKem {
    pub fn keygen_calls(&self) -> usize {
        self.keygens.load(Ordering::SeqCst)
    }

    pub fn decapsulate_calls(&self) -> usize {
        self.decapsulations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KemProvider for CountingKem {
    fn supported_algorithms(&self) -> Vec<AlgorithmDetails> {
        self.inner.supported_algorithms()
    }

    async fn keygen(&self, algorithm: KemAlgorithm) -> Result<KemKeyPair, KemError> {
        self.keygens.fetch_add(1, Ordering::SeqCst);
        self.inner.keygen(algorithm).await
    }

    async fn decapsulate(
        &self,
        algorithm: KemAlgorithm,
        secret_key: &[u8],
        ciphertext: &[u8],
    ) -> Result<SharedSecret, KemError> {
        self.decapsulations.fetch_add(1, Ordering::SeqCst);
        self.inner.decapsulate(algorithm, secret_key, ciphertext).await
    }
}

/// ML-KEM provider whose decapsulation always fails.
#[derive(Default)]
pub struct FailingDecapsulationKem {
    inner: MlKemProvider,
}

#[async_trait]
impl KemProvider for FailingDecapsulationKem {
    fn supported_algorithms(&self) -> Vec<AlgorithmDetails> {
        self.inner.supported_algorithms()
    }

    async fn keygen(&self, algorithm: KemAlgorithm) -> Result<KemKeyPair, KemError> {
        self.inner.keygen(algorithm).await
    }

    async fn decapsulate(
        &self,
        _algorithm: KemAlgorithm,
        _secret_key: &[u8],
        _ciphertext: &[u8],
    ) -> Result<SharedSecret, KemError> {
        Err(KemError::Decapsulation("rejected by test provider".into()))
    }
}

pub struct Harness {
    pub protocol: Arc<PqcProtocol>,
    pub clock: Arc<ManualClock>,
    pub kem: Arc<CountingKem>,
}

pub fn harness() -> Harness {
    harness_with(PqcSettings::default())
}

pub fn harness_with(settings: PqcSettings) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let kem = Arc::new(CountingKem::default());
    let protocol = Arc::new(PqcProtocol::in_memory(settings, kem.clone(), clock.clone()));
    Harness {
        protocol,
        clock,
        kem,
    }
}

/// Client side: encapsulate to the public key from `init`.
pub fn client_ciphertext(init: &HandshakeInit) -> (Vec<u8>, SharedSecret) {
    MlKemProvider::encapsulate(init.algorithm, &init.public_key).unwrap()
}

/// Run init and complete for `subject`.
pub async fn establish_session(
    protocol: &PqcProtocol,
    subject: &SubjectId,
    algorithm: Option<&str>,
) -> HandshakeCompletion {
    let init = protocol.handshake_init(subject, algorithm).await.unwrap();
    let (ciphertext, _) = client_ciphertext(&init);
    protocol
        .handshake_complete(subject, &init.handshake_id, &ciphertext)
        .await
        .unwrap()
}
