use serde::Serialize;

use crate::diseases::DiseaseReport;
use crate::error::PredictError;

/// Outcome of classifying one image.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    pub label: String,
    /// Winning score as a percentage, rounded to two decimals.
    pub confidence: f64,
    pub scores: Vec<f32>,
}

impl Prediction {
    /// Argmax over one output row.
    pub fn from_scores(scores: Vec<f32>, labels: &[String]) -> Result<Self, PredictError> {
        let (class_index, &best) = scores
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .ok_or(PredictError::EmptyOutput)?;

        let label = labels
            .get(class_index)
            .ok_or(PredictError::UnknownClass(class_index))?
            .clone();

        Ok(Prediction {
            class_index,
            label,
            confidence: Self::to_percent(best),
            scores,
        })
    }

    fn to_percent(score: f32) -> f64 {
        (score as f64 * 100.0 * 100.0).round() / 100.0
    }
}

/// Everything the success page shows.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionView {
    pub image_path: String,
    pub prediction: Prediction,
    pub report: DiseaseReport,
}

#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: String,
    pub model_loaded: bool,
    pub version: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct ModelInfo {
    pub model_path: String,
    pub input_shape: Vec<usize>,
    pub batch_size: usize,
    pub labels: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: &str) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
