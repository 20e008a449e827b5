//! Audon Service
//!
//! Entry point for the Audon live audio room coordinator.

use audon_service::cache::EphemeralStore;
use audon_service::config::Config;
use audon_service::observability::metrics::init_metrics_recorder;
use audon_service::repositories::{PgRoomRepository, PgUserRepository};
use audon_service::routes::{self, AppState};
use audon_service::services::{
    Collaborators, CoordinatorSettings, LiveKitClient, MastodonClient, RedisSessionStore,
    RoomCoordinator,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audon_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Audon service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        local_domain = %config.local_domain,
        announcements = config.bot.is_some(),
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        e
    })?;

    info!("Connecting to database...");
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;
    sqlx::migrate!("../../migrations").run(&db_pool).await?;
    info!("Database connection established");

    let sessions = Arc::new(RedisSessionStore::connect(&config.redis_url).await?);
    info!("Session store connected");

    let live = Arc::new(LiveKitClient::new(
        config.livekit_url.clone(),
        config.livekit_api_key.clone(),
        config.livekit_api_secret.clone(),
    )?);
    let mastodon = Arc::new(MastodonClient::new(config.bot.clone())?);

    let store = Arc::new(EphemeralStore::new(
        config.session_cache_ttl(),
        config.disconnect_grace(),
        config.orphan_grace(),
    ));

    let coordinator = RoomCoordinator::new(
        Collaborators {
            rooms: Arc::new(PgRoomRepository::new(db_pool.clone())),
            users: Arc::new(PgUserRepository::new(db_pool)),
            live,
            identity: mastodon.clone(),
            profiles: mastodon,
        },
        CoordinatorSettings::from_config(&config),
        Arc::clone(&store),
    );

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState {
        config,
        coordinator,
        sessions,
    });

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Audon service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.drain();
    info!("Audon service shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
