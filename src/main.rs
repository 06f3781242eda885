use activity_uploader::api;
use activity_uploader::service::UploaderService;
use activity_uploader::storage::Storage;
use activity_uploader::uploader::{CommandUploader, CredentialProvider, EnvCredentials};
use activity_uploader::utils::config::load_config;
use activity_uploader::utils::logging;
use anyhow::Result;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    // Dropping the guard flushes buffered file output, so hold it until exit.
    let _log_guard = logging::init_tracing(config.log_dir.as_deref());

    info!("Starting Activity Uploader v{}", env!("CARGO_PKG_VERSION"));
    info!("Watching: {}", config.watch_folder.display());
    match &config.cache_folder {
        Some(cache) => info!("Polling cache folder: {}", cache.display()),
        None => info!("No cache folder configured"),
    }

    let mut uploader = CommandUploader::new(config.upload_command.clone(), config.upload_args.clone());
    match EnvCredentials.credentials() {
        Ok(credentials) => uploader = uploader.with_credentials(credentials),
        Err(e) => warn!("{}; the upload tool must find credentials on its own", e),
    }

    let storage = Storage::new(&config.database_url).await?;
    storage.run_migrations().await?;

    let port = config.port;
    let service = UploaderService::new(config, storage, Arc::new(uploader));
    service.start();

    let app = Router::new()
        .nest("/api", api::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(service.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Control API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.shutdown().await;
    info!("Uploader stopped gracefully");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
