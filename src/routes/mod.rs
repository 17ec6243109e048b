mod health;
mod model_info;
mod predict_image;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::healthcheck))
        .route("/model/info", get(model_info::model_info))
        .route("/model/reload", post(model_info::reload_model))
        .route("/predict", post(predict_image::predict_image))
}
