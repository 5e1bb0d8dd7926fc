use log::info;
use pqc_stepup::config::{load_config, ServerSettings};
use pqc_stepup::http::{router, AppState};
use pqc_stepup::identity::JwtIdentityVerifier;
use pqc_stepup::kem::MlKemProvider;
use pqc_stepup::session::{
    spawn_sweeper, Clock, HandshakeRegistry, MemorySessionStore, PqcProtocol, RedisSessionStore,
    SessionStore, SystemClock,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let settings = load_config()?;
    info!("Starting with {:?}", settings);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sessions = build_session_store(&settings, clock.clone())?;
    let registry = Arc::new(HandshakeRegistry::new(&settings.pqc, clock.clone()));

    let protocol = Arc::new(PqcProtocol::new(
        settings.pqc.clone(),
        Arc::new(MlKemProvider::new()),
        registry,
        sessions,
        clock,
    ));

    // Spawn a task to purge expired handshakes and sessions
    let _sweeper = spawn_sweeper(protocol.clone(), settings.pqc.sweep_interval());

    let state = Arc::new(AppState {
        protocol,
        identity: Arc::new(JwtIdentityVerifier::hs256(settings.jwt_secret.as_bytes())),
    });

    // Bind the server
    let listener = TcpListener::bind(format!("0.0.0.0:{}", settings.port)).await?;
    info!("Listening on: 0.0.0.0:{}", settings.port);

    axum::serve(listener, router(state)).await?;

    Ok(())
}

fn build_session_store(
    settings: &ServerSettings,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn SessionStore>, Box<dyn std::error::Error>> {
    match &settings.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            info!("Using Redis session store");
            Ok(Arc::new(RedisSessionStore::new(Arc::new(client), clock)))
        }
        None => {
            info!("Using in-memory session store");
            Ok(Arc::new(MemorySessionStore::new(clock)))
        }
    }
}
