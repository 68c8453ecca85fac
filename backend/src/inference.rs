//! Model loading and execution.
//!
//! The artifact is loaded once at startup into a [`TractClassifier`]. Handlers
//! only see the [`Classifier`] trait.

use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use tract_onnx::prelude::tract_ndarray::{Array4, Axis};
use tract_onnx::prelude::*;
use tract_onnx::WithOnnx;

use crate::config::ServerConfig;
use crate::error::{ModelLoadError, PredictError};
use crate::models::Prediction;
use crate::preprocess::replicate_batch;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Something that maps an NHWC image batch to one score row per image.
pub trait Classifier: Send + Sync {
    /// `[batch, height, width, channels]` the model was built for.
    fn input_shape(&self) -> [usize; 4];

    fn classify(&self, batch: Array4<f32>) -> Result<Vec<Vec<f32>>, PredictError>;

    fn batch_size(&self) -> usize {
        self.input_shape()[0]
    }
}

/// Run a single preprocessed image through the model and pick the winner.
///
/// The image is replicated to the model's batch size and the first output row
/// is used.
pub fn classify_image(
    classifier: Option<&dyn Classifier>,
    image: Array4<f32>,
    labels: &[String],
) -> Result<Prediction, PredictError> {
    let classifier = classifier.ok_or(PredictError::ModelNotLoaded)?;

    let batch = replicate_batch(image, classifier.batch_size())?;
    let rows = classifier.classify(batch)?;
    let first = rows.into_iter().next().ok_or(PredictError::EmptyOutput)?;

    Prediction::from_scores(first, labels)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArtifactFormat {
    Nnef,
    Onnx,
    TensorFlow,
}

impl ArtifactFormat {
    fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_lowercase();
        if path.is_dir() || name.ends_with(".nnef.tar") || name.ends_with(".nnef.tgz") {
            Some(ArtifactFormat::Nnef)
        } else if name.ends_with(".onnx") {
            Some(ArtifactFormat::Onnx)
        } else if name.ends_with(".pb") {
            Some(ArtifactFormat::TensorFlow)
        } else {
            None
        }
    }
}

/// Classifier backed by a tract plan.
///
/// `SimplePlan::run` builds fresh execution state on every call, so one plan
/// is shared by all workers without a lock.
pub struct TractClassifier {
    plan: Plan,
    input_shape: [usize; 4],
}

impl TractClassifier {
    pub fn load(config: &ServerConfig) -> Result<Self, ModelLoadError> {
        let path = &config.model_path;
        if !path.exists() {
            return Err(ModelLoadError::NotFound(path.clone()));
        }
        let format = ArtifactFormat::from_path(path)
            .ok_or_else(|| ModelLoadError::UnsupportedFormat(path.clone()))?;
        let expected = config.input_shape();

        let model = match format {
            ArtifactFormat::Nnef => tract_nnef::nnef()
                .with_tract_core()
                .with_onnx()
                .model_for_path(path)?,
            ArtifactFormat::Onnx => tract_onnx::onnx()
                .model_for_path(path)?
                .with_input_fact(0, Self::input_fact(&expected))?
                .into_typed()?,
            ArtifactFormat::TensorFlow => tract_tensorflow::tensorflow()
                .model_for_path(path)?
                .with_input_fact(0, Self::input_fact(&expected))?
                .into_typed()?,
        };

        let model = Self::fix_batch(model, &expected)?;
        let num_classes = Self::check_output(&model, config.labels.len())?;

        let plan = model.into_optimized()?.into_runnable()?;

        info!(
            "Model {:?} ready: input {:?}, {} classes",
            path,
            expected,
            num_classes.map_or_else(|| "?".to_string(), |n| n.to_string())
        );

        Ok(Self {
            plan,
            input_shape: expected,
        })
    }

    fn input_fact(shape: &[usize; 4]) -> InferenceFact {
        InferenceFact::dt_shape(f32::datum_type(), tvec!(shape[0], shape[1], shape[2], shape[3]))
    }

    /// Bind a symbolic batch dimension to the configured batch size, then
    /// check the whole input shape against the configuration.
    fn fix_batch(model: TypedModel, expected: &[usize; 4]) -> Result<TypedModel, ModelLoadError> {
        let batch_dim = model.input_fact(0)?.shape[0].clone();
        let symbols = batch_dim.symbols();

        let model = if symbols.is_empty() {
            model
        } else {
            let mut values = SymbolValues::default();
            for symbol in symbols {
                values = values.with(&symbol, expected[0] as i64);
            }
            model.concretize_dims(&values)?
        };

        let fact = model.input_fact(0)?;
        if fact.shape.as_concrete() != Some(expected.as_slice()) {
            return Err(ModelLoadError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: format!("{:?}", fact),
            });
        }
        Ok(model)
    }

    fn check_output(model: &TypedModel, labels: usize) -> Result<Option<usize>, ModelLoadError> {
        let fact = model.output_fact(0)?;
        let classes = fact
            .shape
            .as_concrete()
            .and_then(|dims| dims.last().copied());

        match classes {
            Some(n) if n != labels => Err(ModelLoadError::LabelMismatch {
                outputs: n,
                labels,
            }),
            Some(n) => Ok(Some(n)),
            None => {
                warn!("Output shape of the model is not concrete: {:?}", fact);
                Ok(None)
            }
        }
    }
}

impl Classifier for TractClassifier {
    fn input_shape(&self) -> [usize; 4] {
        self.input_shape
    }

    fn classify(&self, batch: Array4<f32>) -> Result<Vec<Vec<f32>>, PredictError> {
        if batch.shape() != self.input_shape.as_slice() {
            return Err(PredictError::ShapeMismatch {
                expected: self.input_shape.to_vec(),
                actual: batch.shape().to_vec(),
            });
        }

        let outputs = self.plan.run(tvec!(batch.into_tensor().into()))?;
        let scores = outputs
            .first()
            .ok_or(PredictError::EmptyOutput)?
            .to_array_view::<f32>()?;

        if scores.ndim() == 0 {
            return Err(PredictError::EmptyOutput);
        }
        Ok(scores
            .axis_iter(Axis(0))
            .map(|row| row.iter().copied().collect())
            .collect())
    }
}

/// Load the configured artifact. A failure is logged and leaves the server
/// without a model.
pub fn load_classifier(config: &ServerConfig) -> Option<Arc<dyn Classifier>> {
    match TractClassifier::load(config) {
        Ok(classifier) => Some(Arc::new(classifier)),
        Err(e) => {
            log::error!("Error loading model from {:?}: {}", config.model_path, e);
            None
        }
    }
}
