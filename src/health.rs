use crate::{config::Config, inference_service::InferenceService, response::timestamp};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub service: String,
    pub version: String,
    pub timestamp: String,
    pub uptime_seconds: f64,
    pub model_loaded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model_loaded: bool,
    pub supported_formats: Vec<String>,
    pub max_file_size_mb: f64,
    pub model_input_size: [u32; 2],
    pub confidence_threshold: f64,
}

/// Reports liveness and model readiness. Never touches the prediction pipeline.
pub struct HealthReporter {
    started_at: Instant,
    service: String,
    version: String,
    supported_formats: Vec<String>,
    max_file_size_mb: f64,
    model_input_size: [u32; 2],
}

impl HealthReporter {
    /// `started_at` is the moment the process started, taken before the model load.
    pub fn new(config: &Config, started_at: Instant) -> Self {
        Self {
            started_at,
            service: config.application.name.clone(),
            version: config.application.version().to_string(),
            supported_formats: config.upload.allowed_content_types.clone(),
            max_file_size_mb: config.upload.max_file_size_mb(),
            model_input_size: config.model.input_size,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    pub fn health(&self, inference_service: &InferenceService) -> HealthStatus {
        HealthStatus {
            status: "healthy",
            service: self.service.clone(),
            version: self.version.clone(),
            timestamp: timestamp(),
            uptime_seconds: self.uptime_seconds(),
            model_loaded: inference_service.snapshot().loaded(),
        }
    }

    pub fn model_info(&self, inference_service: &InferenceService) -> ModelInfo {
        let state = inference_service.snapshot();
        ModelInfo {
            model_loaded: state.loaded(),
            supported_formats: self.supported_formats.clone(),
            max_file_size_mb: self.max_file_size_mb,
            model_input_size: self.model_input_size,
            confidence_threshold: state.confidence_threshold(),
        }
    }
}
