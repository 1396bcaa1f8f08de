use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::Registry;

use hmobroadcast::{stream_router, StreamingEngine};
use hmoconfig::get_config;
use hmolibrary::{Library, LibraryOptions};
use hmomedia::{ListenerBus, MemoryDatabase, Player, PlayerSnapshot};

/// Player de substitution tant que le vrai player n'est pas branché :
/// toujours à l'arrêt, aucune piste chargée.
struct IdlePlayer;

impl Player for IdlePlayer {
    fn status(&self) -> PlayerSnapshot {
        PlayerSnapshot::default()
    }

    fn playback_stop(&self) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialiser le logging d'abord
    let subscriber = Registry::default().with(
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true),
    );
    tracing::subscriber::set_global_default(subscriber)?;

    let config = get_config();
    let shutdown = CancellationToken::new();

    info!("🎵 Starting HMOMusic ({})...", config.get_library_name());

    let listeners = Arc::new(ListenerBus::new());
    let db = Arc::new(MemoryDatabase::new());
    let player = Arc::new(IdlePlayer);

    // Coordinateur de bibliothèque ; les scanners sont des plugins externes,
    // aucun n'est embarqué dans ce binaire
    let library = Library::init(
        Vec::new(),
        db.clone(),
        player.clone(),
        listeners.clone(),
        LibraryOptions {
            filescan_disable: config.get_filescan_disable(),
            clear_queue_on_stop_disable: config.get_clear_queue_on_stop_disable(),
        },
    )
    .await;

    // Moteur de diffusion MP3
    let engine = StreamingEngine::start(
        player.clone(),
        db.clone(),
        listeners.clone(),
        shutdown.clone(),
    );

    let app = Router::new().merge(stream_router(engine.clone(), config.get_library_name()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.get_http_port()));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;
    info!(
        "HMOMusic running at http://{}:{}/stream.mp3",
        config.get_base_url(),
        config.get_http_port()
    );

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Ctrl+C reçu, arrêt gracieux");
                }
                _ = server_shutdown.cancelled() => {}
            }
        })
        .await?;

    shutdown.cancel();
    engine.shutdown().await;
    library.shutdown().await;
    info!("HMOMusic arrêté proprement");

    Ok(())
}
