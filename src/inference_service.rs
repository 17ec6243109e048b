use crate::{
    config::ModelConfig,
    model_service::{DegradedModelService, DiagnosisClass, InferenceError, ModelService},
    ort_service::OrtModelService,
    preprocess::{InputSpec, PreprocessedTensor},
};
use parking_lot::RwLock;
use serde::Serialize;
use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Instant};
use tokio::task::JoinError;

#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    pub prediction: DiagnosisClass,
    pub confidence: f64,
    pub probabilities: BTreeMap<DiagnosisClass, f64>,
    pub processing_time_ms: f64,
    /// Set when the result comes from the placeholder model, not a real inference.
    pub degraded_mode: bool,
}

/// Everything a request needs to know about the model. Never mutated once
/// built; a reload installs a whole new state.
pub struct ModelState {
    backend: Arc<dyn ModelService>,
    input: InputSpec,
    confidence_threshold: f64,
    model_path: PathBuf,
    load_error: Option<String>,
}

impl ModelState {
    pub fn new(backend: Arc<dyn ModelService>, config: &ModelConfig) -> Self {
        Self {
            backend,
            input: InputSpec::from(config),
            confidence_threshold: config.confidence_threshold,
            model_path: config.path.clone(),
            load_error: None,
        }
    }

    pub fn degraded(config: &ModelConfig, reason: impl Into<String>) -> Self {
        Self {
            load_error: Some(reason.into()),
            ..Self::new(Arc::new(DegradedModelService), config)
        }
    }

    /// Loads the ONNX model from the configured path, falling back to degraded
    /// mode when the file is missing or unusable.
    pub fn load(config: &ModelConfig) -> Self {
        match OrtModelService::new(config) {
            Ok(service) => {
                tracing::info!("Model loaded from {:?}", config.path);
                Self::new(Arc::new(service), config)
            }
            Err(e) => {
                tracing::error!(
                    "Failed to load model from {:?}: {}. Serving in degraded mode.",
                    config.path,
                    e
                );
                Self::degraded(config, e.to_string())
            }
        }
    }

    pub fn loaded(&self) -> bool {
        !self.backend.is_degraded()
    }

    pub fn input_spec(&self) -> InputSpec {
        self.input
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    pub fn model_path(&self) -> &PathBuf {
        &self.model_path
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Runs the model and turns its scores into a [`PredictionResult`]. Only
    /// this step counts towards `processing_time_ms`.
    pub fn predict(&self, tensor: &PreprocessedTensor) -> Result<PredictionResult, InferenceError> {
        let start = Instant::now();
        let scores = self.backend.predict(tensor)?;
        let distribution = to_distribution(&scores)?;
        let (prediction, confidence) = argmax(&distribution);
        let processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        let probabilities = DiagnosisClass::ALL
            .iter()
            .copied()
            .zip(distribution)
            .collect();

        Ok(PredictionResult {
            prediction,
            confidence,
            probabilities,
            processing_time_ms,
            degraded_mode: self.backend.is_degraded(),
        })
    }
}

/// Holds the current [`ModelState`]. Requests take a snapshot and keep it for
/// their whole lifetime, so a reload never affects a request mid-flight.
pub struct InferenceService {
    state: RwLock<Arc<ModelState>>,
    model_config: ModelConfig,
}

impl InferenceService {
    pub fn new(state: ModelState, model_config: ModelConfig) -> Self {
        Self {
            state: RwLock::new(Arc::new(state)),
            model_config,
        }
    }

    pub fn from_config(model_config: &ModelConfig) -> Self {
        Self::new(ModelState::load(model_config), model_config.clone())
    }

    pub fn snapshot(&self) -> Arc<ModelState> {
        self.state.read().clone()
    }

    /// Swaps in a new state and returns the previous one.
    pub fn install(&self, state: ModelState) -> Arc<ModelState> {
        std::mem::replace(&mut *self.state.write(), Arc::new(state))
    }

    /// Loads the configured model again and installs the result, degraded or not.
    pub async fn reload(&self) -> Result<Arc<ModelState>, JoinError> {
        let config = self.model_config.clone();
        let state = tokio::task::spawn_blocking(move || ModelState::load(&config)).await?;
        self.install(state);
        Ok(self.snapshot())
    }
}

/// Turns raw scores into a probability distribution. Scores that already form
/// a distribution are renormalized, anything else goes through softmax.
fn to_distribution(scores: &[f32]) -> Result<Vec<f64>, InferenceError> {
    let expected = DiagnosisClass::ALL.len();
    if scores.len() != expected {
        return Err(InferenceError::OutputShape {
            expected,
            actual: scores.len(),
        });
    }

    let scores: Vec<f64> = scores.iter().map(|&s| f64::from(s)).collect();
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(InferenceError::NonFinite);
    }

    let sum: f64 = scores.iter().sum();
    if scores.iter().all(|&s| s >= 0.0) && (sum - 1.0).abs() <= 1e-3 {
        return Ok(scores.iter().map(|s| s / sum).collect());
    }

    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    Ok(exps.iter().map(|e| e / total).collect())
}

// Strict comparison keeps the earliest class on ties.
fn argmax(distribution: &[f64]) -> (DiagnosisClass, f64) {
    DiagnosisClass::ALL
        .iter()
        .copied()
        .zip(distribution.iter().copied())
        .fold((DiagnosisClass::ALL[0], f64::NEG_INFINITY), |best, candidate| {
            if candidate.1 > best.1 {
                candidate
            } else {
                best
            }
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::UploadConfig;
    use crate::decoder::decode_image;
    use crate::preprocess::preprocess;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    pub struct MockModelService {
        pub scores: Vec<f32>,
    }

    impl ModelService for MockModelService {
        fn predict(&self, _input: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError> {
            Ok(self.scores.clone())
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    pub struct FailingModelService;

    impl ModelService for FailingModelService {
        fn predict(&self, _input: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError> {
            Err(InferenceError::Backend("backend unavailable".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn small_config() -> ModelConfig {
        ModelConfig {
            input_size: [16, 16],
            ..ModelConfig::default()
        }
    }

    fn tensor(config: &ModelConfig) -> PreprocessedTensor {
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(8, 8))
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        let decoded = decode_image(&buffer.into_inner(), &UploadConfig::default()).unwrap();
        preprocess(&decoded, InputSpec::from(config)).unwrap()
    }

    fn state_with(scores: Vec<f32>) -> ModelState {
        ModelState::new(Arc::new(MockModelService { scores }), &small_config())
    }

    fn assert_sums_to_one(result: &PredictionResult) {
        let sum: f64 = result.probabilities.values().sum();
        assert!((sum - 1.0).abs() < 1e-6, "sum was {}", sum);
    }

    #[test]
    fn test_predict_picks_highest_probability() {
        let state = state_with(vec![0.1, 0.7, 0.2]);
        let result = state.predict(&tensor(&small_config())).unwrap();

        assert_eq!(result.prediction, DiagnosisClass::Malignant);
        assert!((result.confidence - 0.7).abs() < 1e-6);
        assert_eq!(result.confidence, result.probabilities[&DiagnosisClass::Malignant]);
        assert!(!result.degraded_mode);
        assert!(result.processing_time_ms >= 0.0);
        assert_sums_to_one(&result);
    }

    #[test]
    fn test_logits_go_through_softmax() {
        let state = state_with(vec![-2.0, 1.0, 4.5]);
        let result = state.predict(&tensor(&small_config())).unwrap();

        assert_eq!(result.prediction, DiagnosisClass::Normal);
        assert!(result.probabilities.values().all(|p| (0.0..=1.0).contains(p)));
        assert_sums_to_one(&result);
    }

    #[test]
    fn test_ties_break_in_class_order() {
        let state = state_with(vec![0.2, 0.4, 0.4]);
        let result = state.predict(&tensor(&small_config())).unwrap();
        assert_eq!(result.prediction, DiagnosisClass::Malignant);

        let state = state_with(vec![5.0, 5.0, 5.0]);
        let result = state.predict(&tensor(&small_config())).unwrap();
        assert_eq!(result.prediction, DiagnosisClass::Benign);
    }

    #[test]
    fn test_rejects_unexpected_output() {
        let state = state_with(vec![0.5, 0.5]);
        let result = state.predict(&tensor(&small_config()));
        assert!(matches!(
            result,
            Err(InferenceError::OutputShape {
                expected: 3,
                actual: 2
            })
        ));

        let state = state_with(vec![f32::NAN, 0.5, 0.5]);
        assert!(matches!(
            state.predict(&tensor(&small_config())),
            Err(InferenceError::NonFinite)
        ));
    }

    #[test]
    fn test_backend_failure_propagates() {
        let state = ModelState::new(Arc::new(FailingModelService), &small_config());
        assert!(matches!(
            state.predict(&tensor(&small_config())),
            Err(InferenceError::Backend(_))
        ));
    }

    #[test]
    fn test_degraded_mode_is_flagged() {
        let state = ModelState::degraded(&small_config(), "no model");
        assert!(!state.loaded());
        assert_eq!(state.load_error(), Some("no model"));

        let result = state.predict(&tensor(&small_config())).unwrap();
        assert!(result.degraded_mode);
        assert_eq!(result.prediction, DiagnosisClass::Benign);
        assert_sums_to_one(&result);
    }

    #[test]
    fn test_missing_model_falls_back_to_degraded() {
        let config = ModelConfig {
            path: PathBuf::from("./missing/model.onnx"),
            ..small_config()
        };
        let state = ModelState::load(&config);
        assert!(!state.loaded());
        assert_eq!(state.backend_name(), "degraded");
        assert!(state.load_error().is_some());
    }

    #[test]
    fn test_install_swaps_whole_state() {
        let state = ModelState::degraded(&small_config(), "none");
        let service = InferenceService::new(state, small_config());
        let before = service.snapshot();
        assert!(!before.loaded());

        let previous = service.install(state_with(vec![0.0, 0.0, 1.0]));
        assert!(Arc::ptr_eq(&before, &previous));

        // The old snapshot is still usable and unchanged.
        assert!(!before.loaded());
        assert!(service.snapshot().loaded());
    }

    #[tokio::test]
    async fn test_reload_without_model_stays_degraded() {
        let config = ModelConfig {
            path: PathBuf::from("./missing/model.onnx"),
            ..small_config()
        };
        let service = InferenceService::new(state_with(vec![1.0, 0.0, 0.0]), config);
        assert!(service.snapshot().loaded());

        let state = service.reload().await.unwrap();
        assert!(!state.loaded());
        assert!(!service.snapshot().loaded());
    }
}
