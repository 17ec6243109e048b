use crate::{
    decoder::DecodedImage, inference_service::PredictionResult, statistics::ImageStatistics,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

pub const SUCCESS_MESSAGE: &str = "Image processed successfully";
pub const DEGRADED_MESSAGE: &str =
    "No model loaded: this prediction is a placeholder and is not a diagnosis";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub format: String,
}

impl From<&DecodedImage> for ImageInfo {
    fn from(image: &DecodedImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            channels: image.channels(),
            format: image.format_name().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionResponse {
    pub status: &'static str,
    pub filename: String,
    pub image_info: ImageInfo,
    pub image_stats: ImageStatistics,
    pub prediction_result: PredictionResult,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error_code: &'static str,
    pub detail: String,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status: "error",
            error_code,
            detail: detail.into(),
            timestamp: timestamp(),
        }
    }
}

/// ISO-8601 UTC timestamp, e.g. `2024-05-01T12:00:00.123456Z`.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn assemble(
    filename: String,
    image_info: ImageInfo,
    image_stats: ImageStatistics,
    prediction_result: PredictionResult,
) -> PredictionResponse {
    let message = if prediction_result.degraded_mode {
        DEGRADED_MESSAGE
    } else {
        SUCCESS_MESSAGE
    };

    PredictionResponse {
        status: "success",
        filename,
        image_info,
        image_stats,
        prediction_result,
        message: message.to_string(),
        timestamp: timestamp(),
    }
}
