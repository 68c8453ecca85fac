use std::borrow::Cow;
use std::path::PathBuf;

use thiserror::Error;
use tract_onnx::prelude::TractError;

pub const MSG_NO_FILE: &str = "No file selected";
pub const MSG_PROCESSING: &str = "Error processing image";
pub const MSG_MODEL_NOT_LOADED: &str = "Model not loaded. Please ensure the model file is present.";
pub const MSG_PREDICTION: &str = "Error during prediction";

/// Names the accepted suffixes, e.g. "Please upload a PNG, JPG, or JPEG image."
pub fn invalid_type_message(allowed: &[String]) -> String {
    let names: Vec<String> = allowed.iter().map(|e| e.to_uppercase()).collect();
    let listed = match names.as_slice() {
        [] => "supported".to_string(),
        [only] => only.clone(),
        [first, second] => format!("{} or {}", first, second),
        [rest @ .., last] => format!("{}, or {}", rest.join(", "), last),
    };
    format!("Invalid file type. Please upload a {} image.", listed)
}

/// Everything that can stop an upload from turning into a prediction.
///
/// Each variant maps onto exactly one message shown on the form; the details
/// only ever reach the server log.
#[derive(Error, Debug)]
pub enum PredictError {
    #[error("no file field in the upload")]
    NoFile,

    #[error("file type not allowed: {filename}")]
    InvalidFileType {
        filename: String,
        allowed: Vec<String>,
    },

    #[error("upload exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("failed to store upload: {0}")]
    Upload(#[from] std::io::Error),

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("prediction requested but model is not loaded")]
    ModelNotLoaded,

    #[error("input shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("model produced an empty output row")]
    EmptyOutput,

    #[error("no label configured for class index {0}")]
    UnknownClass(usize),
}

impl PredictError {
    /// Message rendered on the form for this failure.
    pub fn user_message(&self) -> Cow<'static, str> {
        match self {
            PredictError::NoFile => MSG_NO_FILE.into(),
            PredictError::InvalidFileType { allowed, .. } => invalid_type_message(allowed).into(),
            PredictError::TooLarge { .. } | PredictError::Decode(_) => MSG_PROCESSING.into(),
            PredictError::ModelNotLoaded => MSG_MODEL_NOT_LOADED.into(),
            PredictError::Upload(_)
            | PredictError::ShapeMismatch { .. }
            | PredictError::Inference(_)
            | PredictError::EmptyOutput
            | PredictError::UnknownClass(_) => MSG_PREDICTION.into(),
        }
    }

    /// Input mistakes are the visitor's, not the server's.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            PredictError::NoFile | PredictError::InvalidFileType { .. }
        )
    }
}

impl From<image::ImageError> for PredictError {
    fn from(err: image::ImageError) -> Self {
        PredictError::Decode(err.to_string())
    }
}

impl From<TractError> for PredictError {
    fn from(err: TractError) -> Self {
        PredictError::Inference(format!("{:#}", err))
    }
}

/// Startup failures while loading the inference artifact. Never fatal: the
/// server keeps running without a model.
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("model file not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported model format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("model input shape mismatch: expected {expected:?}, artifact declares {actual}")]
    ShapeMismatch { expected: Vec<usize>, actual: String },

    #[error("model has {outputs} output classes but {labels} labels are configured")]
    LabelMismatch { outputs: usize, labels: usize },

    #[error("tract: {0:#}")]
    Tract(#[from] TractError),
}
