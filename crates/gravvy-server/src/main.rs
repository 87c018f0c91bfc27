mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use gravvy_api::{AppState, AppStateInner};
use gravvy_db::Database;
use gravvy_media::MediaStore;
use gravvy_notify::{ActivityRecorder, EventBus, EventHandler, Notifier, Transport};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gravvy=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    let media = MediaStore::new(config.media_root.clone(), &config.media_base_url()).await?;

    let transport = match &config.notify_webhook {
        Some(url) => {
            info!("Notifications go to webhook {}", url);
            Transport::webhook(url.clone())
        }
        None => {
            info!("No notification webhook configured, deliveries are only logged");
            Transport::Log
        }
    };

    // Activities are recorded before notifications are planned from them.
    let (notifier, worker) =
        Notifier::start(db.clone(), config.notify_settings(), transport.clone());
    let handlers: Vec<Arc<dyn EventHandler>> = vec![
        Arc::new(ActivityRecorder::new(db.clone())),
        Arc::new(notifier),
    ];
    let bus = EventBus::new(handlers);

    let state: AppState = Arc::new(AppStateInner {
        db,
        media,
        bus,
        transport,
        settings: config.api_settings(),
    });

    let mut app = Router::new().nest("/api/v1", gravvy_api::router(state));
    if let Some(mount) = config.media_mount() {
        app = app.nest_service(&mount, ServeDir::new(&config.media_root));
    }
    let app = app
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Gravvy server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");

    // The router owned the last bus handle, so the queue closes and the
    // worker exits once it has delivered what is left.
    if let Err(e) = worker.await {
        warn!("Notification worker failed: {}", e);
    }
    info!("Notification worker drained");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down");
    }
}
