use pqc_stepup::config::{load_config, ConfigError};
use pqc_stepup::kem::KemAlgorithm;
use std::env;

const VARS: [&str; 9] = [
    "PORT",
    "JWT_SECRET",
    "REDIS_URL",
    "PQC_DEFAULT_KEM",
    "PQC_ALLOWED_KEMS",
    "PQC_HANDSHAKE_TTL_SECONDS",
    "PQC_SESSION_TTL_SECONDS",
    "PQC_MAX_PENDING_PER_SUBJECT",
    "PQC_SWEEP_INTERVAL_SECONDS",
];

// Process environment is global, so everything runs in one test.
#[test]
fn test_server_settings_from_environment() {
    // Save original environment variables
    let originals: Vec<(&str, Option<String>)> =
        VARS.iter().map(|var| (*var, env::var(var).ok())).collect();
    for var in VARS {
        env::remove_var(var);
    }

    // JWT secret is mandatory
    assert_eq!(
        load_config().unwrap_err(),
        ConfigError::Missing("JWT_SECRET")
    );

    // Defaults
    env::set_var("JWT_SECRET", "env-test-secret");
    let settings = load_config().unwrap();
    assert_eq!(settings.port, 8080);
    assert_eq!(settings.redis_url, None);
    assert_eq!(settings.pqc.default_algorithm, KemAlgorithm::MlKem768);
    assert_eq!(settings.pqc.handshake_ttl_seconds, 120);
    assert_eq!(settings.pqc.session_ttl_seconds, 300);

    // Overrides
    env::set_var("PORT", "9443");
    env::set_var("REDIS_URL", "redis://cache:6379");
    env::set_var("PQC_ALLOWED_KEMS", "ML-KEM-1024");
    env::set_var("PQC_DEFAULT_KEM", "ML-KEM-1024");
    env::set_var("PQC_SESSION_TTL_SECONDS", "60");
    let settings = load_config().unwrap();
    assert_eq!(settings.port, 9443);
    assert_eq!(settings.redis_url.as_deref(), Some("redis://cache:6379"));
    assert_eq!(settings.pqc.allowed_algorithms, vec![KemAlgorithm::MlKem1024]);
    assert_eq!(settings.pqc.session_ttl_seconds, 60);

    // Invalid values are reported, not defaulted
    env::set_var("PQC_HANDSHAKE_TTL_SECONDS", "soon");
    assert!(matches!(
        load_config().unwrap_err(),
        ConfigError::Invalid {
            var: "PQC_HANDSHAKE_TTL_SECONDS",
            ..
        }
    ));

    // Restore original environment variables
    for (var, value) in originals {
        match value {
            Some(value) => env::set_var(var, value),
            None => env::remove_var(var),
        }
    }
}
