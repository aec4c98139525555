use std::net::SocketAddr;
use std::sync::Arc;

use common::jwt::{decode_signing_key_base64, TokenVault};
use common::secret::ExposeSecret;
use session_service::config::Config;
use session_service::rotation::RotationEngine;
use session_service::routes::{self, AppState};
use session_service::store::RedisSessionStore;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting session service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {e}");
        anyhow::anyhow!(e)
    })?;

    info!("Configuration loaded successfully");

    let pkcs8 = decode_signing_key_base64(config.signing_key.expose_secret())
        .map_err(|e| anyhow::anyhow!("Failed to decode signing key: {e}"))?;
    let vault = Arc::new(
        TokenVault::from_pkcs8(
            &pkcs8,
            config.jwt_issuer.clone(),
            config.access_ttl_seconds,
            config.refresh_ttl_seconds,
        )
        .map_err(|e| anyhow::anyhow!("Failed to build token vault: {e}"))?,
    );

    info!("Connecting to session store...");
    let store = RedisSessionStore::connect(config.redis_url.expose_secret())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to session store: {e}"))?;
    info!("Session store connection established");

    let engine = Arc::new(RotationEngine::new(
        store,
        vault,
        config.rotation_grace_seconds,
        config.rotation_idempotency_seconds,
        config.sliding_threshold_seconds,
    ));

    let app = routes::router(AppState { engine });

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {e}");
        anyhow::anyhow!("Invalid bind address: {e}")
    })?;

    info!("Session service listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
