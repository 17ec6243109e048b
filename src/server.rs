use crate::{
    config::{Config, ServerConfig},
    health::HealthReporter,
    inference_service::InferenceService,
    pipeline::PredictionPipeline,
    routes::api_routes,
};
use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    Router,
};
use std::{sync::Arc, time::Instant};
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct SharedState {
    pub pipeline: PredictionPipeline,
    pub health: Arc<HealthReporter>,
}

impl SharedState {
    pub fn new(
        config: &Config,
        inference_service: Arc<InferenceService>,
        started_at: Instant,
    ) -> Self {
        Self {
            pipeline: PredictionPipeline::new(config.upload.clone(), inference_service),
            health: Arc::new(HealthReporter::new(config, started_at)),
        }
    }

    pub fn inference_service(&self) -> &InferenceService {
        self.pipeline.inference_service()
    }
}

pub fn build_router(state: SharedState, server_config: &ServerConfig) -> Router {
    let body_limit = state
        .pipeline
        .upload_config()
        .max_file_size
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .merge(api_routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(log_requests))
        .layer(cors_layer(server_config))
}

fn cors_layer(server_config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if server_config.allows_any_origin() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = server_config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

async fn log_requests(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    tracing::info!("Request: {} {}", method, uri);

    let response = next.run(request).await;

    tracing::info!(
        "Response: {} {} {} - {:.3}s",
        method,
        uri,
        response.status().as_u16(),
        start.elapsed().as_secs_f64()
    );
    response
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(state: SharedState, config: &Config) -> anyhow::Result<Self> {
        let addr = config.server.get_address();
        let router = build_router(state, &config.server);
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok(())
        });

        Ok(server_handle)
    }
}
