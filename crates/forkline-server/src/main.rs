mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use forkline_api::generator::HttpGenerator;
use forkline_api::state::AppStateInner;
use forkline_core::{EchoGenerator, Engine, EngineConfig, MemoryStore, ReplyGenerator, Store};
use forkline_db::SqliteStore;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forkline=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init store
    let store: Arc<dyn Store> = if config.in_memory() {
        info!("Using in-memory store; nothing will be persisted");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(SqliteStore::open(&config.db_path)?)
    };

    let engine = Engine::open(
        store,
        EngineConfig {
            default_model: config.default_model.clone(),
        },
    )?;

    let generator: Arc<dyn ReplyGenerator> = match &config.generator_url {
        Some(url) => {
            info!("Replies generated by {}", url);
            Arc::new(HttpGenerator::new(url.clone(), config.generator_timeout)?)
        }
        None => {
            info!("FORKLINE_GENERATOR_URL unset, replies will echo the prompt");
            Arc::new(EchoGenerator)
        }
    };

    let state = AppStateInner::new(engine, generator, config.default_user);

    let app = forkline_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Forkline server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
