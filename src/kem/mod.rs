//! KEM capability seam.
//!
//! The protocol engine never touches lattice math directly. It talks to a
//! [`KemProvider`], which owns key generation and decapsulation for a closed
//! set of [`KemAlgorithm`] variants. Byte lengths per variant are fixed and
//! known up front so the engine can reject malformed ciphertexts before the
//! primitive ever sees them.

pub mod ml_kem;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use zeroize::Zeroizing;

pub use self::ml_kem::MlKemProvider;

/// Secret key bytes, wiped on drop.
pub type SecretKeyBytes = Zeroizing<Vec<u8>>;

/// Decapsulated shared secret, wiped on drop.
pub type SharedSecret = Zeroizing<Vec<u8>>;

/// Supported key encapsulation mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KemAlgorithm {
    #[serde(rename = "ML-KEM-512")]
    MlKem512,
    #[serde(rename = "ML-KEM-768")]
    MlKem768,
    #[serde(rename = "ML-KEM-1024")]
    MlKem1024,
}

/// Fixed parameters of a KEM variant, as reported by algorithm discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmDetails {
    pub name: String,
    pub claimed_nist_level: u8,
    pub is_ind_cca: bool,
    pub length_public_key: usize,
    pub length_secret_key: usize,
    pub length_ciphertext: usize,
    pub length_shared_secret: usize,
}

struct Params {
    nist_level: u8,
    public_key_len: usize,
    secret_key_len: usize,
    ciphertext_len: usize,
    shared_secret_len: usize,
}

// FIPS 203, table 3.
const ML_KEM_512: Params = Params {
    nist_level: 1,
    public_key_len: 800,
    secret_key_len: 1632,
    ciphertext_len: 768,
    shared_secret_len: 32,
};

const ML_KEM_768: Params = Params {
    nist_level: 3,
    public_key_len: 1184,
    secret_key_len: 2400,
    ciphertext_len: 1088,
    shared_secret_len: 32,
};

const ML_KEM_1024: Params = Params {
    nist_level: 5,
    public_key_len: 1568,
    secret_key_len: 3168,
    ciphertext_len: 1568,
    shared_secret_len: 32,
};

impl KemAlgorithm {
    pub const ALL: [KemAlgorithm; 3] = [
        KemAlgorithm::MlKem512,
        KemAlgorithm::MlKem768,
        KemAlgorithm::MlKem1024,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            KemAlgorithm::MlKem512 => "ML-KEM-512",
            KemAlgorithm::MlKem768 => "ML-KEM-768",
            KemAlgorithm::MlKem1024 => "ML-KEM-1024",
        }
    }

    fn params(&self) -> &'static Params {
        match self {
            KemAlgorithm::MlKem512 => &ML_KEM_512,
            KemAlgorithm::MlKem768 => &ML_KEM_768,
            KemAlgorithm::MlKem1024 => &ML_KEM_1024,
        }
    }

    pub fn public_key_len(&self) -> usize {
        self.params().public_key_len
    }

    pub fn secret_key_len(&self) -> usize {
        self.params().secret_key_len
    }

    pub fn ciphertext_len(&self) -> usize {
        self.params().ciphertext_len
    }

    pub fn shared_secret_len(&self) -> usize {
        self.params().shared_secret_len
    }

    pub fn details(&self) -> AlgorithmDetails {
        let params = self.params();
        AlgorithmDetails {
            name: self.name().to_string(),
            claimed_nist_level: params.nist_level,
            is_ind_cca: true,
            length_public_key: params.public_key_len,
            length_secret_key: params.secret_key_len,
            length_ciphertext: params.ciphertext_len,
            length_shared_secret: params.shared_secret_len,
        }
    }
}

impl fmt::Display for KemAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KemAlgorithm {
    type Err = KemError;

    /// Accepts the FIPS 203 names and the legacy Kyber round-3 names that
    /// older clients still send.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "ML-KEM-512" | "MLKEM512" | "KYBER512" => Ok(KemAlgorithm::MlKem512),
            "ML-KEM-768" | "MLKEM768" | "KYBER768" => Ok(KemAlgorithm::MlKem768),
            "ML-KEM-1024" | "MLKEM1024" | "KYBER1024" => Ok(KemAlgorithm::MlKem1024),
            _ => Err(KemError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Keypair produced by [`KemProvider::keygen`].
pub struct KemKeyPair {
    pub public_key: Vec<u8>,
    pub secret_key: SecretKeyBytes,
}

impl fmt::Debug for KemKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KemKeyPair")
            .field("public_key_len", &self.public_key.len())
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum KemError {
    #[error("KEM algorithm '{0}' is not available")]
    UnsupportedAlgorithm(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Encapsulation failed: {0}")]
    Encapsulation(String),

    #[error("Decapsulation failed: {0}")]
    Decapsulation(String),
}

/// External KEM capability.
///
/// Implementations must be safe to call from many request tasks at once.
#[async_trait]
pub trait KemProvider: Send + Sync {
    /// Algorithms this provider can serve, with their fixed lengths.
    fn supported_algorithms(&self) -> Vec<AlgorithmDetails>;

    async fn keygen(&self, algorithm: KemAlgorithm) -> Result<KemKeyPair, KemError>;

    async fn decapsulate(
        &self,
        algorithm: KemAlgorithm,
        secret_key: &[u8],
        ciphertext: &[u8],
    ) -> Result<SharedSecret, KemError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_algorithm_names() {
        assert_eq!(
            "ML-KEM-768".parse::<KemAlgorithm>().unwrap(),
            KemAlgorithm::MlKem768
        );
        assert_eq!(
            "ml_kem_512".parse::<KemAlgorithm>().unwrap(),
            KemAlgorithm::MlKem512
        );
        assert_eq!(
            "Kyber1024".parse::<KemAlgorithm>().unwrap(),
            KemAlgorithm::MlKem1024
        );
        assert!(matches!(
            "Classic-McEliece-348864".parse::<KemAlgorithm>(),
            Err(KemError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_display_round_trips_through_from_str() {
        for algorithm in KemAlgorithm::ALL {
            assert_eq!(algorithm.to_string().parse::<KemAlgorithm>().unwrap(), algorithm);
        }
    }

    #[test]
    fn test_details_table() {
        let details = KemAlgorithm::MlKem768.details();
        assert_eq!(details.name, "ML-KEM-768");
        assert_eq!(details.claimed_nist_level, 3);
        assert_eq!(details.length_public_key, 1184);
        assert_eq!(details.length_ciphertext, 1088);
        assert_eq!(details.length_shared_secret, 32);

        assert_eq!(KemAlgorithm::MlKem512.ciphertext_len(), 768);
        assert_eq!(KemAlgorithm::MlKem1024.ciphertext_len(), 1568);
    }

    #[test]
    fn test_keypair_debug_redacts_secret() {
        let keypair = KemKeyPair {
            public_key: vec![1, 2, 3],
            secret_key: Zeroizing::new(vec![0xAA; 16]),
        };
        let rendered = format!("{:?}", keypair);
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("170"));
    }
}
