use crate::preprocess::PreprocessedTensor;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Model backend failed: {0}")]
    Backend(String),
    #[error("Model returned {actual} scores, expected {expected}")]
    OutputShape { expected: usize, actual: usize },
    #[error("Model returned non-finite scores")]
    NonFinite,
    #[error("Inference task failed: {0}")]
    Task(String),
}

/// Diagnosis classes, declared in tie-break priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DiagnosisClass {
    #[serde(rename = "Benign Case")]
    Benign,
    #[serde(rename = "Malignant Case")]
    Malignant,
    #[serde(rename = "Normal Case")]
    Normal,
}

impl DiagnosisClass {
    pub const ALL: [DiagnosisClass; 3] = [
        DiagnosisClass::Benign,
        DiagnosisClass::Malignant,
        DiagnosisClass::Normal,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DiagnosisClass::Benign => "Benign Case",
            DiagnosisClass::Malignant => "Malignant Case",
            DiagnosisClass::Normal => "Normal Case",
        }
    }
}

/// A model that maps a preprocessed tensor to one raw score per
/// [`DiagnosisClass`], in `DiagnosisClass::ALL` order.
///
/// Implementations are called from blocking worker threads.
pub trait ModelService: Send + Sync + 'static {
    fn predict(&self, input: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError>;

    fn name(&self) -> &str;

    /// True when the scores are a placeholder rather than a real model output.
    fn is_degraded(&self) -> bool {
        false
    }
}

/// Stand-in used when no model could be loaded. Always answers with a uniform
/// distribution so the response contract stays stable.
#[derive(Debug, Clone, Default)]
pub struct DegradedModelService;

impl ModelService for DegradedModelService {
    fn predict(&self, _input: &PreprocessedTensor) -> Result<Vec<f32>, InferenceError> {
        let uniform = 1.0 / DiagnosisClass::ALL.len() as f32;
        Ok(vec![uniform; DiagnosisClass::ALL.len()])
    }

    fn name(&self) -> &str {
        "degraded"
    }

    fn is_degraded(&self) -> bool {
        true
    }
}
