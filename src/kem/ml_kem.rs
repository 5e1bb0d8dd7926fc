//! ML-KEM (FIPS 203) provider backed by the RustCrypto `ml-kem` crate.
//!
//! Keys cross this boundary as raw encoded bytes. Secret keys and shared
//! secrets are always returned inside `Zeroizing` containers.

use super::{AlgorithmDetails, KemAlgorithm, KemError, KemKeyPair, KemProvider, SharedSecret};
use ::kem::{Decapsulate, Encapsulate};
use ::ml_kem::{Ciphertext, Encoded, EncodedSizeUser, KemCore, MlKem1024, MlKem512, MlKem768};
use async_trait::async_trait;
use rand_core::OsRng;
use zeroize::Zeroizing;

/// In-process ML-KEM provider for all three parameter sets.
#[derive(Debug, Clone, Default)]
pub struct MlKemProvider;

impl MlKemProvider {
    pub fn new() -> Self {
        Self
    }

    /// Client side of the handshake: encapsulate to `public_key`.
    ///
    /// Returns `(ciphertext, shared_secret)`. The server never calls this; it
    /// exists for clients, tests and benchmarks living in the same process.
    pub fn encapsulate(
        algorithm: KemAlgorithm,
        public_key: &[u8],
    ) -> Result<(Vec<u8>, SharedSecret), KemError> {
        match algorithm {
            KemAlgorithm::MlKem512 => encapsulate_with::<MlKem512>(public_key),
            KemAlgorithm::MlKem768 => encapsulate_with::<MlKem768>(public_key),
            KemAlgorithm::MlKem1024 => encapsulate_with::<MlKem1024>(public_key),
        }
    }
}

fn generate_with<K: KemCore>() -> KemKeyPair {
    let mut rng = OsRng;
    let (decapsulation_key, encapsulation_key) = K::generate(&mut rng);

    KemKeyPair {
        public_key: encapsulation_key.as_bytes().to_vec(),
        secret_key: Zeroizing::new(decapsulation_key.as_bytes().to_vec()),
    }
}

fn decapsulate_with<K: KemCore>(
    secret_key: &[u8],
    ciphertext: &[u8],
) -> Result<SharedSecret, KemError> {
    let dk_bytes = Encoded::<K::DecapsulationKey>::try_from(secret_key)
        .map_err(|_| KemError::Decapsulation("invalid secret key length".into()))?;
    let decapsulation_key = <K::DecapsulationKey as EncodedSizeUser>::from_bytes(&dk_bytes);

    let ct = Ciphertext::<K>::try_from(ciphertext)
        .map_err(|_| KemError::Decapsulation("invalid ciphertext length".into()))?;

    let shared_secret = decapsulation_key
        .decapsulate(&ct)
        .map_err(|_| KemError::Decapsulation("primitive rejected ciphertext".into()))?;

    Ok(Zeroizing::new(shared_secret.to_vec()))
}

fn encapsulate_with<K: KemCore>(public_key: &[u8]) -> Result<(Vec<u8>, SharedSecret), KemError> {
    let ek_bytes = Encoded::<K::EncapsulationKey>::try_from(public_key)
        .map_err(|_| KemError::Encapsulation("invalid public key length".into()))?;
    let encapsulation_key = <K::EncapsulationKey as EncodedSizeUser>::from_bytes(&ek_bytes);

    let mut rng = OsRng;
    let (ciphertext, shared_secret) = encapsulation_key
        .encapsulate(&mut rng)
        .map_err(|_| KemError::Encapsulation("primitive rejected public key".into()))?;

    Ok((ciphertext.to_vec(), Zeroizing::new(shared_secret.to_vec())))
}

#[async_trait]
impl KemProvider for MlKemProvider {
    fn supported_algorithms(&self) -> Vec<AlgorithmDetails> {
        KemAlgorithm::ALL.iter().map(KemAlgorithm::details).collect()
    }

    async fn keygen(&self, algorithm: KemAlgorithm) -> Result<KemKeyPair, KemError> {
        let keypair = match algorithm {
            KemAlgorithm::MlKem512 => generate_with::<MlKem512>(),
            KemAlgorithm::MlKem768 => generate_with::<MlKem768>(),
            KemAlgorithm::MlKem1024 => generate_with::<MlKem1024>(),
        };
        Ok(keypair)
    }

    async fn decapsulate(
        &self,
        algorithm: KemAlgorithm,
        secret_key: &[u8],
        ciphertext: &[u8],
    ) -> Result<SharedSecret, KemError> {
        match algorithm {
            KemAlgorithm::MlKem512 => decapsulate_with::<MlKem512>(secret_key, ciphertext),
            KemAlgorithm::MlKem768 => decapsulate_with::<MlKem768>(secret_key, ciphertext),
            KemAlgorithm::MlKem1024 => decapsulate_with::<MlKem1024>(secret_key, ciphertext),
        }
    }
}
