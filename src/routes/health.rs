use crate::{health::HealthStatus, server::SharedState};
use axum::{extract::State, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct ServiceMetadata {
    service: String,
    message: String,
    version: String,
}

pub async fn root(State(state): State<SharedState>) -> Json<ServiceMetadata> {
    Json(ServiceMetadata {
        service: state.health.service().to_string(),
        message: format!("{} is running", state.health.service()),
        version: state.health.version().to_string(),
    })
}

pub async fn healthcheck(State(state): State<SharedState>) -> Json<HealthStatus> {
    Json(state.health.health(state.inference_service()))
}
