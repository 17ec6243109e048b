use crate::{
    pipeline::{PipelineError, UploadedImage},
    response::{ErrorResponse, PredictionResponse},
    server::SharedState,
    validation::ValidationError,
};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::instrument;

const FILE_FIELD: &str = "file";
const INTERNAL_ERROR_DETAIL: &str = "Internal error while processing the image";

impl PipelineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Validation(ValidationError::UnsupportedContentType(_))
            | PipelineError::Validation(ValidationError::UnsupportedExtension(_)) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            PipelineError::Validation(ValidationError::FileTooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            PipelineError::Validation(_) | PipelineError::Decode(_) => StatusCode::BAD_REQUEST,
            PipelineError::Preprocess(_) | PipelineError::Inference(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            PipelineError::Validation(ValidationError::UnsupportedContentType(_))
            | PipelineError::Validation(ValidationError::UnsupportedExtension(_)) => {
                "UNSUPPORTED_MEDIA_TYPE"
            }
            PipelineError::Validation(ValidationError::FileTooLarge { .. }) => "PAYLOAD_TOO_LARGE",
            PipelineError::Validation(_) => "VALIDATION_ERROR",
            PipelineError::Decode(_) => "DECODE_ERROR",
            PipelineError::Preprocess(_) => "PREPROCESS_ERROR",
            PipelineError::Inference(_) => "INFERENCE_ERROR",
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = if status.is_server_error() {
            INTERNAL_ERROR_DETAIL.to_string()
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse::new(self.error_code(), detail))).into_response()
    }
}

#[instrument(skip(state, multipart))]
pub async fn predict_image(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResponse>, PipelineError> {
    let max_file_size = state.pipeline.upload_config().max_file_size;

    let upload = match multipart {
        Ok(multipart) => read_upload(multipart, max_file_size).await,
        Err(rejection) => {
            tracing::warn!("Rejected request without a multipart body: {}", rejection);
            Err(ValidationError::MissingFile)
        }
    };

    let upload = match upload {
        Ok(Some(upload)) => upload,
        Ok(None) => return Err(reject(ValidationError::MissingFile.into(), None)),
        Err(e) => return Err(reject(e.into(), None)),
    };

    let filename = upload.filename.clone();
    let content_type = upload.content_type.clone();
    let size = upload.bytes.len();
    tracing::info!(
        "Processing upload {:?} ({} bytes, content type {:?})",
        filename,
        size,
        content_type
    );

    match state.pipeline.run(upload).await {
        Ok(response) => {
            tracing::info!(
                "Predicted {} for {:?} with confidence {:.3}",
                response.prediction_result.prediction.label(),
                filename,
                response.prediction_result.confidence
            );
            Ok(Json(response))
        }
        Err(e) => Err(reject(e, Some((filename.as_str(), size, content_type.as_deref())))),
    }
}

fn reject(error: PipelineError, upload: Option<(&str, usize, Option<&str>)>) -> PipelineError {
    let (filename, size, content_type) = upload.unwrap_or(("", 0, None));

    if error.status_code().is_server_error() {
        tracing::error!(
            "Failed to process upload {:?} ({} bytes, content type {:?}): {}",
            filename,
            size,
            content_type,
            error
        );
    } else {
        tracing::warn!(
            "Rejected upload {:?} ({} bytes, content type {:?}): {}",
            filename,
            size,
            content_type,
            error
        );
    }
    error
}

/// Reads the `file` field, buffering at most `max_file_size + 1` bytes so an
/// oversized upload is detected without holding all of it in memory.
async fn read_upload(
    mut multipart: Multipart,
    max_file_size: usize,
) -> Result<Option<UploadedImage>, ValidationError> {
    let to_validation_error = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ValidationError::FileTooLarge {
                limit: max_file_size,
            }
        } else {
            ValidationError::MalformedUpload(e.body_text())
        }
    };

    while let Some(mut field) = multipart.next_field().await.map_err(to_validation_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(to_validation_error)? {
            bytes.extend_from_slice(&chunk);
            if bytes.len() > max_file_size {
                break;
            }
        }

        return Ok(Some(UploadedImage {
            bytes,
            content_type,
            filename,
        }));
    }

    Ok(None)
}
