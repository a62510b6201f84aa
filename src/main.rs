//! Werewolf game server binary entrypoint wiring REST, WebSocket, storage,
//! and the phase timer dispatcher.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use werewolf_back::{
    config::AppConfig,
    dao::room_store::{RoomStore, memory::MemoryRoomStore},
    routes,
    services::{room_service, storage_supervisor, timer_service},
    state::{AppState, SharedState},
};

#[cfg(feature = "mongo-store")]
use werewolf_back::dao::room_store::mongodb::{MongoConfig, MongoRoomStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env();
    let port = config.port;
    let app_state = AppState::new(config);

    install_storage(app_state.clone()).await?;

    tokio::spawn(timer_service::run_dispatcher(app_state.clone()));
    tokio::spawn(room_service::run_reaper(app_state.clone()));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    room_service::shutdown(&app_state).await;

    Ok(())
}

/// Pick the storage backend: MongoDB behind the reconnect supervisor when a
/// URI is configured, the in-memory store otherwise.
async fn install_storage(state: SharedState) -> anyhow::Result<()> {
    #[cfg(feature = "mongo-store")]
    if env::var("MONGO_URI").is_ok() {
        spawn_mongo_supervisor(state).await?;
        return Ok(());
    }

    info!("MONGO_URI not set; using the in-memory store");
    let store: Arc<dyn RoomStore> = Arc::new(MemoryRoomStore::new());
    state.install_game_store(store).await;
    Ok(())
}

/// Launch the storage supervisor task responsible for maintaining the MongoDB connection.
#[cfg(feature = "mongo-store")]
async fn spawn_mongo_supervisor(state: SharedState) -> anyhow::Result<()> {
    let config = Arc::new(MongoConfig::from_env().await?);

    tokio::spawn(storage_supervisor::run(state, {
        move || {
            let cfg = config.clone();
            async move {
                let store = MongoRoomStore::connect((*cfg).clone()).await?;
                Ok::<Arc<dyn RoomStore>, _>(Arc::new(store))
            }
        }
    }));

    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
