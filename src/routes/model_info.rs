use crate::{health::ModelInfo, response::ErrorResponse, server::SharedState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("Model reload task failed: {0}")]
    Task(#[from] JoinError),
}

impl IntoResponse for ReloadError {
    fn into_response(self) -> Response {
        tracing::error!("{}", self);
        let body = ErrorResponse::new("RELOAD_ERROR", "Model reload failed");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

pub async fn model_info(State(state): State<SharedState>) -> Json<ModelInfo> {
    Json(state.health.model_info(state.inference_service()))
}

#[instrument(skip(state))]
pub async fn reload_model(
    State(state): State<SharedState>,
) -> Result<Json<ModelInfo>, ReloadError> {
    let model_state = state.inference_service().reload().await?;

    if model_state.loaded() {
        tracing::info!(
            "Reloaded model from {:?} ({} backend)",
            model_state.model_path(),
            model_state.backend_name()
        );
    } else {
        tracing::warn!(
            "Model reload from {:?} failed, now serving in degraded mode: {}",
            model_state.model_path(),
            model_state.load_error().unwrap_or("unknown error")
        );
    }

    Ok(Json(state.health.model_info(state.inference_service())))
}
