use crate::config::Config;
use crate::inference_service::InferenceService;
use crate::server::{HttpServer, SharedState};

use std::{error::Error, sync::Arc, time::Instant};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let started_at = Instant::now();
    tracing::info!(
        "Starting {} v{} (debug: {})",
        config.application.name,
        config.application.version(),
        config.application.debug
    );
    tracing::info!("CORS allowed origins: {:?}", config.server.allowed_origins);

    let model_config = config.model.clone();
    let inference_service = match tokio::task::spawn_blocking(move || {
        InferenceService::from_config(&model_config)
    })
    .await
    {
        Ok(service) => Arc::new(service),
        Err(e) => {
            tracing::error!("Failed to initialize inference service: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let model_state = inference_service.snapshot();
    if model_state.loaded() {
        tracing::info!("Model ready ({} backend)", model_state.backend_name());
    } else {
        tracing::warn!("No model loaded, predictions will be placeholders");
    }

    let state = SharedState::new(&config, inference_service, started_at);
    let server = HttpServer::new(state, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
