//! Trained model → NNEF artifact.
//!
//! The model is read with the tract front-end matching its file extension,
//! its input signature is optionally pinned, and the decluttered typed graph
//! is written as an NNEF tarball the server can load without the front-end.

use std::path::{Path, PathBuf};

use log::{info, warn};
use tempfile::NamedTempFile;
use thiserror::Error;
use tract_onnx::prelude::*;
use tract_onnx::WithOnnx;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("input model not found: {0}")]
    NotFound(PathBuf),

    #[error("cannot tell the model format of {0} (expected .onnx or .pb)")]
    UnknownFormat(PathBuf),

    #[error("failed to write artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0:#}")]
    Tract(#[from] TractError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Onnx,
    TensorFlow,
}

impl ModelFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "onnx" => Some(ModelFormat::Onnx),
            "pb" => Some(ModelFormat::TensorFlow),
            _ => None,
        }
    }
}

/// How the input signature of the exported artifact is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Strategy {
    /// Override input 0 with `[N, height, width, channels]` f32.
    Pinned,
    /// Keep whatever input fact the model declares.
    Inferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    /// `None` leaves the batch dimension symbolic.
    pub batch: Option<usize>,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl Default for InputShape {
    fn default() -> Self {
        Self {
            batch: None,
            height: 255,
            width: 255,
            channels: 3,
        }
    }
}

impl InputShape {
    fn fact(&self, model: &InferenceModel) -> InferenceFact {
        let batch: TDim = match self.batch {
            Some(n) => n.to_dim(),
            None => model.sym("N").into(),
        };
        let shape: TVec<TDim> = tvec!(
            batch,
            self.height.to_dim(),
            self.width.to_dim(),
            self.channels.to_dim()
        );
        InferenceFact::dt_shape(f32::datum_type(), shape)
    }
}

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub shape: InputShape,
    pub strategy: Strategy,
    /// Retry with [`Strategy::Inferred`] when pinning fails.
    pub fallback: bool,
}

/// Input and output facts of a written artifact, for reporting.
#[derive(Debug, Clone)]
pub struct ConversionSummary {
    pub strategy: Strategy,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

pub fn convert(options: &ConvertOptions) -> Result<ConversionSummary, ConvertError> {
    if !options.input.exists() {
        return Err(ConvertError::NotFound(options.input.clone()));
    }
    let format = ModelFormat::from_path(&options.input)
        .ok_or_else(|| ConvertError::UnknownFormat(options.input.clone()))?;

    let (model, strategy) = match typed_model(&options.input, format, options.strategy, &options.shape) {
        Ok(model) => (model, options.strategy),
        Err(e) if options.fallback && options.strategy == Strategy::Pinned => {
            warn!("Pinned conversion failed ({:#}), retrying with the model's own input signature", e);
            let model = typed_model(&options.input, format, Strategy::Inferred, &options.shape)?;
            (model, Strategy::Inferred)
        }
        Err(e) => return Err(e.into()),
    };
    info!("Model converted to a typed graph ({:?} input signature)", strategy);

    let summary = ConversionSummary {
        strategy,
        inputs: facts(&model, model.input_outlets()?)?,
        outputs: facts(&model, model.output_outlets()?)?,
    };

    write_artifact(&model, &options.output)?;
    info!("Artifact saved as {}", options.output.display());

    Ok(summary)
}

fn load(path: &Path, format: ModelFormat) -> TractResult<InferenceModel> {
    let model = match format {
        ModelFormat::Onnx => tract_onnx::onnx().model_for_path(path)?,
        ModelFormat::TensorFlow => tract_tensorflow::tensorflow().model_for_path(path)?,
    };
    info!("Model loaded from {}", path.display());
    Ok(model)
}

fn typed_model(
    path: &Path,
    format: ModelFormat,
    strategy: Strategy,
    shape: &InputShape,
) -> TractResult<TypedModel> {
    let mut model = load(path, format)?;
    if strategy == Strategy::Pinned {
        let fact = shape.fact(&model);
        model.set_input_fact(0, fact)?;
    }
    model.into_typed()?.into_decluttered()
}

fn facts(model: &TypedModel, outlets: &[OutletId]) -> TractResult<Vec<String>> {
    outlets
        .iter()
        .map(|outlet| Ok(format!("{:?}", model.outlet_fact(*outlet)?)))
        .collect()
}

/// Serialize into a temporary file next to `path` and move it into place
/// only once the archive is complete.
fn write_artifact(model: &TypedModel, path: &Path) -> Result<(), ConvertError> {
    let write_error = |source: std::io::Error| ConvertError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_error)?;
    tract_nnef::nnef()
        .with_tract_core()
        .with_onnx()
        .write_to_tar(model, tmp.as_file_mut())?;
    tmp.persist(path).map_err(|e| write_error(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tract_onnx::prelude::tract_ndarray::Array4;

    // Just enough protobuf to hand-build small ONNX graphs.
    fn varint(mut value: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                out.push(byte);
                return;
            }
            out.push(byte | 0x80);
        }
    }

    fn int_field(field: u64, value: i64, out: &mut Vec<u8>) {
        varint(field << 3, out);
        varint(value as u64, out);
    }

    fn bytes_field(field: u64, data: &[u8], out: &mut Vec<u8>) {
        varint(field << 3 | 2, out);
        varint(data.len() as u64, out);
        out.extend_from_slice(data);
    }

    /// f32 tensor type; `None` dims are the symbolic batch `N`.
    fn value_info(name: &str, dims: Option<&[Option<i64>]>) -> Vec<u8> {
        let mut tensor = Vec::new();
        int_field(1, 1, &mut tensor);
        if let Some(dims) = dims {
            let mut shape = Vec::new();
            for dim in dims {
                let mut d = Vec::new();
                match dim {
                    Some(v) => int_field(1, *v, &mut d),
                    None => bytes_field(2, b"N", &mut d),
                }
                bytes_field(1, &d, &mut shape);
            }
            bytes_field(2, &shape, &mut tensor);
        }
        let mut ty = Vec::new();
        bytes_field(1, &tensor, &mut ty);

        let mut info = Vec::new();
        bytes_field(1, name.as_bytes(), &mut info);
        bytes_field(2, &ty, &mut info);
        info
    }

    fn ints_attribute(name: &str, values: &[i64]) -> Vec<u8> {
        let mut attr = Vec::new();
        bytes_field(1, name.as_bytes(), &mut attr);
        for v in values {
            int_field(8, *v, &mut attr);
        }
        int_field(20, 7, &mut attr);
        attr
    }

    fn int_attribute(name: &str, value: i64) -> Vec<u8> {
        let mut attr = Vec::new();
        bytes_field(1, name.as_bytes(), &mut attr);
        int_field(3, value, &mut attr);
        int_field(20, 2, &mut attr);
        attr
    }

    fn node(op: &str, inputs: &[&str], attributes: &[Vec<u8>]) -> Vec<u8> {
        let mut node = Vec::new();
        for input in inputs {
            bytes_field(1, input.as_bytes(), &mut node);
        }
        bytes_field(2, b"output", &mut node);
        bytes_field(3, op.to_lowercase().as_bytes(), &mut node);
        bytes_field(4, op.as_bytes(), &mut node);
        for attr in attributes {
            bytes_field(5, attr, &mut node);
        }
        node
    }

    fn initializer(name: &str, dims: &[i64], data: &[f32]) -> Vec<u8> {
        let mut tensor = Vec::new();
        for d in dims {
            int_field(1, *d, &mut tensor);
        }
        int_field(2, 1, &mut tensor);
        bytes_field(8, name.as_bytes(), &mut tensor);
        let raw: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        bytes_field(9, &raw, &mut tensor);
        tensor
    }

    fn onnx_model(node: Vec<u8>, initializers: &[Vec<u8>], input: Vec<u8>, output: Vec<u8>) -> Vec<u8> {
        let mut graph = Vec::new();
        bytes_field(1, &node, &mut graph);
        bytes_field(2, b"potato", &mut graph);
        for init in initializers {
            bytes_field(5, init, &mut graph);
        }
        bytes_field(11, &input, &mut graph);
        bytes_field(12, &output, &mut graph);

        let mut opset = Vec::new();
        int_field(2, 11, &mut opset);

        let mut model = Vec::new();
        int_field(1, 6, &mut model);
        bytes_field(7, &graph, &mut model);
        bytes_field(8, &opset, &mut model);
        model
    }

    /// Sums each channel over height and width. Declares a small 4x4 input
    /// so pinning visibly changes the signature.
    fn channel_sum_onnx() -> Vec<u8> {
        onnx_model(
            node(
                "ReduceSum",
                &["input"],
                &[ints_attribute("axes", &[1, 2]), int_attribute("keepdims", 0)],
            ),
            &[],
            value_info("input", Some(&[None, Some(4), Some(4), Some(3)])),
            value_info("output", Some(&[None, Some(3)])),
        )
    }

    /// Only accepts rank-2 input, so pinning a 4D image signature fails.
    fn rank_two_onnx() -> Vec<u8> {
        onnx_model(
            node("Concat", &["input", "extra"], &[int_attribute("axis", 0)]),
            &[initializer("extra", &[1, 3], &[0.0, 0.5, 1.0])],
            value_info("input", Some(&[None, Some(3)])),
            value_info("output", None),
        )
    }

    fn read_artifact(path: &Path) -> TypedModel {
        tract_nnef::nnef()
            .with_tract_core()
            .with_onnx()
            .model_for_path(path)
            .unwrap()
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ModelFormat::from_path(Path::new("potato_model.onnx")), Some(ModelFormat::Onnx));
        assert_eq!(ModelFormat::from_path(Path::new("frozen.PB")), Some(ModelFormat::TensorFlow));
        assert_eq!(ModelFormat::from_path(Path::new("potato_model.h5")), None);
        assert_eq!(ModelFormat::from_path(Path::new("model")), None);
    }

    #[test]
    fn test_default_shape() {
        let shape = InputShape::default();
        assert_eq!(shape.batch, None);
        assert_eq!((shape.height, shape.width, shape.channels), (255, 255, 3));
    }

    fn options(dir: &TempDir, input: &str) -> ConvertOptions {
        ConvertOptions {
            input: dir.path().join(input),
            output: dir.path().join("out.nnef.tar"),
            shape: InputShape::default(),
            strategy: Strategy::Pinned,
            fallback: true,
        }
    }

    #[test]
    fn test_missing_input() {
        let dir = TempDir::new().unwrap();
        let err = convert(&options(&dir, "absent.onnx")).unwrap_err();
        assert!(matches!(err, ConvertError::NotFound(_)));
        assert!(!dir.path().join("out.nnef.tar").exists());
    }

    #[test]
    fn test_unknown_format() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("potato_model.h5"), b"HDF").unwrap();
        let err = convert(&options(&dir, "potato_model.h5")).unwrap_err();
        assert!(matches!(err, ConvertError::UnknownFormat(_)));
    }

    #[test]
    fn test_corrupt_model_fails_both_strategies() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.onnx"), b"not a protobuf at all").unwrap();
        let err = convert(&options(&dir, "broken.onnx")).unwrap_err();
        assert!(matches!(err, ConvertError::Tract(_)));
        assert!(!dir.path().join("out.nnef.tar").exists());
    }

    #[test]
    fn test_pinned_conversion_keeps_batch_symbolic() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("potato_model.onnx"), channel_sum_onnx()).unwrap();
        let options = options(&dir, "potato_model.onnx");

        let summary = convert(&options).unwrap();
        assert_eq!(summary.strategy, Strategy::Pinned);
        assert!(summary.inputs[0].contains("255,255,3"), "{:?}", summary.inputs);

        let model = read_artifact(&options.output);
        let input = model.input_fact(0).unwrap().clone();
        let batch = input.shape[0].symbols().into_iter().next().expect("symbolic batch");
        assert_eq!(input.shape[1], 255.to_dim());
        assert_eq!(input.shape[3], 3.to_dim());

        let plan = model
            .concretize_dims(&SymbolValues::default().with(&batch, 2))
            .unwrap()
            .into_optimized()
            .unwrap()
            .into_runnable()
            .unwrap();
        let ones = Array4::<f32>::ones((2, 255, 255, 3));
        let outputs = plan.run(tvec!(ones.into_tensor().into())).unwrap();
        let scores = outputs[0].to_array_view::<f32>().unwrap();
        assert_eq!(scores.shape(), &[2, 3]);
        assert!(scores.iter().all(|v| *v == 65025.0));

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 2, "{:?}", names);
    }

    #[test]
    fn test_pinned_fixed_batch() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("potato_model.onnx"), channel_sum_onnx()).unwrap();
        let options = ConvertOptions {
            shape: InputShape {
                batch: Some(32),
                ..InputShape::default()
            },
            ..options(&dir, "potato_model.onnx")
        };

        convert(&options).unwrap();
        let model = read_artifact(&options.output);
        let input = model.input_fact(0).unwrap();
        assert_eq!(input.shape.as_concrete(), Some(&[32, 255, 255, 3][..]));
    }

    #[test]
    fn test_falls_back_to_inferred_signature() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("rank2.onnx"), rank_two_onnx()).unwrap();

        let summary = convert(&options(&dir, "rank2.onnx")).unwrap();
        assert_eq!(summary.strategy, Strategy::Inferred);
        let model = read_artifact(&dir.path().join("out.nnef.tar"));
        assert_eq!(model.input_fact(0).unwrap().rank(), 2);
    }

    #[test]
    fn test_no_fallback_reports_pinned_failure() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("rank2.onnx"), rank_two_onnx()).unwrap();
        let options = ConvertOptions {
            fallback: false,
            ..options(&dir, "rank2.onnx")
        };

        let err = convert(&options).unwrap_err();
        assert!(matches!(err, ConvertError::Tract(_)));
        assert!(!options.output.exists());
    }

    #[test]
    fn test_unwritable_output_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("potato_model.onnx"), channel_sum_onnx()).unwrap();
        let options = ConvertOptions {
            output: dir.path().join("missing").join("out.nnef.tar"),
            ..options(&dir, "potato_model.onnx")
        };

        let err = convert(&options).unwrap_err();
        assert!(matches!(err, ConvertError::Write { .. }));
        assert!(!dir.path().join("missing").exists());
    }
}
