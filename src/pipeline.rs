use crate::{
    config::UploadConfig,
    decoder::{decode_image, DecodeError},
    inference_service::InferenceService,
    model_service::InferenceError,
    preprocess::{preprocess, PreprocessError},
    response::{assemble, ImageInfo, PredictionResponse},
    statistics::compute_statistics,
    validation::{validate_upload, UploadMeta, ValidationError},
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// One uploaded file, owned by the request that received it.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub filename: String,
}

impl UploadedImage {
    pub fn meta(&self) -> UploadMeta<'_> {
        UploadMeta {
            content_type: self.content_type.as_deref(),
            filename: &self.filename,
            size: self.bytes.len(),
        }
    }
}

#[derive(Clone)]
pub struct PredictionPipeline {
    upload_config: Arc<UploadConfig>,
    inference_service: Arc<InferenceService>,
}

impl PredictionPipeline {
    pub fn new(upload_config: UploadConfig, inference_service: Arc<InferenceService>) -> Self {
        Self {
            upload_config: Arc::new(upload_config),
            inference_service,
        }
    }

    pub fn upload_config(&self) -> &UploadConfig {
        &self.upload_config
    }

    pub fn inference_service(&self) -> &Arc<InferenceService> {
        &self.inference_service
    }

    pub async fn run(&self, upload: UploadedImage) -> Result<PredictionResponse, PipelineError> {
        validate_upload(&upload.meta(), &self.upload_config)?;

        let state = self.inference_service.snapshot();
        let limits = self.upload_config.clone();
        let UploadedImage {
            bytes, filename, ..
        } = upload;

        let (image_info, image_stats, prediction) = tokio::task::spawn_blocking(
            move || -> Result<_, PipelineError> {
                let decoded = decode_image(&bytes, &limits)?;
                let image_stats = compute_statistics(&decoded, bytes.len());
                let tensor = preprocess(&decoded, state.input_spec())?;
                let prediction = state.predict(&tensor)?;
                Ok((ImageInfo::from(&decoded), image_stats, prediction))
            },
        )
        .await
        .map_err(|e| InferenceError::Task(e.to_string()))??;

        Ok(assemble(filename, image_info, image_stats, prediction))
    }
}
