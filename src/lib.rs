mod decoder;
mod health;
mod inference_service;
mod model_service;
mod ort_service;
mod pipeline;
mod preprocess;
mod response;
mod routes;
mod server;
mod statistics;
mod validation;

pub mod app;
pub mod config;

pub use app::start_app;
