//! Environment-driven server configuration.

use crate::kem::KemAlgorithm;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HANDSHAKE_TTL_SECONDS: u64 = 120; // 2 minutes
const DEFAULT_SESSION_TTL_SECONDS: u64 = 300; // 5 minutes
const DEFAULT_MAX_PENDING_PER_SUBJECT: usize = 5;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 30;

/// Upper bound for either TTL. Step-up proofs are meant to be short-lived.
const MAX_TTL_SECONDS: u64 = 24 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Handshake and session policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PqcSettings {
    /// Used when `handshake_init` names no algorithm.
    pub default_algorithm: KemAlgorithm,
    pub allowed_algorithms: Vec<KemAlgorithm>,
    pub handshake_ttl_seconds: u64,
    pub session_ttl_seconds: u64,
    pub max_pending_per_subject: usize,
    pub sweep_interval_seconds: u64,
}

impl Default for PqcSettings {
    fn default() -> Self {
        Self {
            default_algorithm: KemAlgorithm::MlKem768,
            allowed_algorithms: KemAlgorithm::ALL.to_vec(),
            handshake_ttl_seconds: DEFAULT_HANDSHAKE_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            max_pending_per_subject: DEFAULT_MAX_PENDING_PER_SUBJECT,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
        }
    }
}

impl PqcSettings {
    pub fn handshake_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.handshake_ttl_seconds as i64)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_seconds as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn is_allowed(&self, algorithm: KemAlgorithm) -> bool {
        self.allowed_algorithms.contains(&algorithm)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ttl("PQC_HANDSHAKE_TTL_SECONDS", self.handshake_ttl_seconds)?;
        check_ttl("PQC_SESSION_TTL_SECONDS", self.session_ttl_seconds)?;

        if self.allowed_algorithms.is_empty() {
            return Err(ConfigError::Invalid {
                var: "PQC_ALLOWED_KEMS",
                value: String::new(),
                reason: "at least one algorithm must be allowed".to_string(),
            });
        }
        if !self.is_allowed(self.default_algorithm) {
            return Err(ConfigError::Invalid {
                var: "PQC_DEFAULT_KEM",
                value: self.default_algorithm.to_string(),
                reason: "default algorithm is not in the allow-list".to_string(),
            });
        }
        if self.max_pending_per_subject == 0 {
            return Err(ConfigError::Invalid {
                var: "PQC_MAX_PENDING_PER_SUBJECT",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.sweep_interval_seconds == 0 {
            return Err(ConfigError::Invalid {
                var: "PQC_SWEEP_INTERVAL_SECONDS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn check_ttl(var: &'static str, seconds: u64) -> Result<(), ConfigError> {
    if seconds == 0 || seconds > MAX_TTL_SECONDS {
        return Err(ConfigError::Invalid {
            var,
            value: seconds.to_string(),
            reason: format!("must be between 1 and {}", MAX_TTL_SECONDS),
        });
    }
    Ok(())
}

#[derive(Clone)]
pub struct ServerSettings {
    pub port: u16,
    /// HS256 secret shared with the identity token issuer.
    pub jwt_secret: String,
    /// Session store backend; in-memory when unset.
    pub redis_url: Option<String>,
    pub pqc: PqcSettings,
}

impl fmt::Debug for ServerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSettings")
            .field("port", &self.port)
            .field("jwt_secret", &"[REDACTED]")
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("pqc", &self.pqc)
            .finish()
    }
}

/// Load settings from the process environment.
pub fn load_config() -> Result<ServerSettings, ConfigError> {
    load_config_from(|key| env::var(key).ok())
}

/// Load settings through an arbitrary variable lookup.
pub fn load_config_from<F>(lookup: F) -> Result<ServerSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = PqcSettings::default();

    let port = parse_or("PORT", lookup("PORT"), DEFAULT_PORT)?;

    let jwt_secret = lookup("JWT_SECRET")
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::Missing("JWT_SECRET"))?;

    let redis_url = lookup("REDIS_URL").filter(|s| !s.is_empty());

    let allowed_algorithms = match lookup("PQC_ALLOWED_KEMS") {
        Some(list) if !list.trim().is_empty() => parse_algorithm_list(&list)?,
        _ => defaults.allowed_algorithms.clone(),
    };

    let default_algorithm = match lookup("PQC_DEFAULT_KEM") {
        Some(name) => name.parse().map_err(|_| ConfigError::Invalid {
            var: "PQC_DEFAULT_KEM",
            value: name.clone(),
            reason: "unknown KEM algorithm".to_string(),
        })?,
        None => defaults.default_algorithm,
    };

    let pqc = PqcSettings {
        default_algorithm,
        allowed_algorithms,
        handshake_ttl_seconds: parse_or(
            "PQC_HANDSHAKE_TTL_SECONDS",
            lookup("PQC_HANDSHAKE_TTL_SECONDS"),
            defaults.handshake_ttl_seconds,
        )?,
        session_ttl_seconds: parse_or(
            "PQC_SESSION_TTL_SECONDS",
            lookup("PQC_SESSION_TTL_SECONDS"),
            defaults.session_ttl_seconds,
        )?,
        max_pending_per_subject: parse_or(
            "PQC_MAX_PENDING_PER_SUBJECT",
            lookup("PQC_MAX_PENDING_PER_SUBJECT"),
            defaults.max_pending_per_subject,
        )?,
        sweep_interval_seconds: parse_or(
            "PQC_SWEEP_INTERVAL_SECONDS",
            lookup("PQC_SWEEP_INTERVAL_SECONDS"),
            defaults.sweep_interval_seconds,
        )?,
    };
    pqc.validate()?;

    Ok(ServerSettings {
        port,
        jwt_secret,
        redis_url,
        pqc,
    })
}

fn parse_or<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match raw {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: value.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_algorithm_list(list: &str) -> Result<Vec<KemAlgorithm>, ConfigError> {
    let mut algorithms = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let algorithm: KemAlgorithm = name.parse().map_err(|_| ConfigError::Invalid {
            var: "PQC_ALLOWED_KEMS",
            value: name.to_string(),
            reason: "unknown KEM algorithm".to_string(),
        })?;
        if !algorithms.contains(&algorithm) {
            algorithms.push(algorithm);
        }
    }
    Ok(algorithms)
}
