use crate::{
    config::ModelConfig,
    model_service::{InferenceError, ModelService},
    preprocess::PreprocessedTensor,
};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("Model file not found: {0:?}")]
    NotFound(PathBuf),
    #[error("Failed to load ONNX model: {0}")]
    Ort(#[from] ort::Error),
}

/// ONNX Runtime backend with a small pool of sessions handed out round-robin.
pub struct OrtModelService {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
}

fn build_session(path: &Path) -> Result<Session, ort::Error> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_file(path)?;
    Ok(session)
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelLoadError> {
        let path = model_config.get_path();
        if !path.is_file() {
            return Err(ModelLoadError::NotFound(path.to_path_buf()));
        }

        let sessions = (0..model_config.num_instances)
            .map(|_| build_session(path).map(Mutex::new))
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!("Created {} ONNX sessions from {:?}", sessions.len(), path);

        Ok(Self {
            sessions,
            counter: AtomicUsize::new(0),
        })
    }
}

impl ModelService for OrtModelService {
    fn predict(&self, input: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index].lock();
        tracing::debug!("Handling request with session {} (input {:?})", index, input.shape());

        let tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| InferenceError::Backend(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| InferenceError::Backend(format!("inference failed: {}", e)))?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Backend(format!("failed to extract tensor: {}", e)))?;

        Ok(scores.to_vec())
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_file_is_reported() {
        let config = ModelConfig {
            path: PathBuf::from("./does/not/exist.onnx"),
            ..ModelConfig::default()
        };

        let result = OrtModelService::new(&config);
        assert!(matches!(result, Err(ModelLoadError::NotFound(_))));
    }

    #[test]
    fn test_corrupt_model_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("corrupt-model-{}.onnx", std::process::id()));
        std::fs::write(&path, b"this is not an onnx graph").unwrap();
        let config = ModelConfig {
            path: path.clone(),
            num_instances: 1,
            ..ModelConfig::default()
        };

        let result = OrtModelService::new(&config);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ModelLoadError::Ort(_))));
    }
}
