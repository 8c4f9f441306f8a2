//! ONNX classifier backend via the `ort` crate.
//!
//! Expects a single-input, single-output graph:
//! - input  `[1, T, C, 1]` f32 cepstral features (batch may be dynamic)
//! - output `[1, num_classes]` f32 scores
//!
//! Threading can be tuned with `HARK_ORT_INTRA_THREADS`.

use std::path::{Path, PathBuf};

use ndarray::Array4;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Value;
use tracing::{debug, info};

use crate::error::{HarkError, Result};
use crate::features::{FeatureShape, FeatureTensor};
use crate::inference::{Classifier, TensorDescriptor};

pub struct OnnxClassifier {
    path: PathBuf,
    session: Session,
    input: TensorDescriptor,
    output: TensorDescriptor,
    num_classes: usize,
    expected: FeatureShape,
}

fn intra_threads() -> usize {
    let default = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .clamp(1, 4);
    std::env::var("HARK_ORT_INTRA_THREADS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
        .clamp(1, 32)
}

fn create_session(path: &Path) -> Result<Session> {
    let intra = intra_threads();
    debug!(intra_threads = intra, "ONNX session threading configured");
    SessionBuilder::new()
        .map_err(|e| malformed(path, e))?
        .with_intra_threads(intra)
        .map_err(|e| malformed(path, e))?
        .with_optimization_level(GraphOptimizationLevel::All)
        .map_err(|e| malformed(path, e))?
        .commit_from_file(path)
        .map_err(|e| malformed(path, e))
}

fn malformed(path: &Path, reason: impl ToString) -> HarkError {
    HarkError::ModelMalformed {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

impl OnnxClassifier {
    /// Load and validate a model against the feature shape it will be fed.
    ///
    /// # Errors
    /// - `ModelNotFound` if `path` is not a file
    /// - `ModelMalformed` if the runtime cannot parse it or it has no input/output
    /// - `ModelShapeMismatch` if its input cannot take `expected`
    pub fn load(path: &Path, expected: FeatureShape) -> Result<Self> {
        if !path.is_file() {
            return Err(HarkError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }
        info!("loading ONNX classifier from {:?}", path);
        let session = create_session(path)?;

        let input = session
            .inputs()
            .first()
            .map(|i| {
                let shape = i
                    .dtype()
                    .tensor_shape()
                    .map(|s| s.to_vec())
                    .unwrap_or_default();
                TensorDescriptor::new(i.name(), shape)
                    .with_element_type(format!("{:?}", i.dtype()))
            })
            .ok_or_else(|| malformed(path, "graph has no inputs"))?;
        let output = session
            .outputs()
            .first()
            .map(|o| {
                let shape = o
                    .dtype()
                    .tensor_shape()
                    .map(|s| s.to_vec())
                    .unwrap_or_default();
                TensorDescriptor::new(o.name(), shape)
                    .with_element_type(format!("{:?}", o.dtype()))
            })
            .ok_or_else(|| malformed(path, "graph has no outputs"))?;
        info!(input = ?input, output = ?output, "model signature");

        input.check_accepts(expected)?;

        let mut classifier = Self {
            path: path.to_path_buf(),
            session,
            num_classes: output.last_static_dim().unwrap_or(0),
            input,
            output,
            expected,
        };
        if classifier.num_classes == 0 {
            // Dynamic class dimension: ask the graph.
            classifier.num_classes = classifier.run_zeros()?.len();
            info!(num_classes = classifier.num_classes, "class count discovered");
        }
        if classifier.num_classes == 0 {
            return Err(malformed(path, "model produces no class scores"));
        }
        Ok(classifier)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run_zeros(&mut self) -> Result<Vec<f32>> {
        let zeros = Array4::<f32>::zeros((1, self.expected.frames, self.expected.coefficients, 1));
        self.run_array(zeros)
    }

    fn run_array(&mut self, features: Array4<f32>) -> Result<Vec<f32>> {
        let value = Value::from_array(features)
            .map_err(|e: ort::Error| HarkError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![self.input.name.as_str() => value])
            .map_err(|e| HarkError::Inference(e.to_string()))?;
        let (_, scores) = outputs[self.output.name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| HarkError::Inference(e.to_string()))?;
        Ok(scores.to_vec())
    }
}

impl Classifier for OnnxClassifier {
    fn input(&self) -> &TensorDescriptor {
        &self.input
    }

    fn output(&self) -> &TensorDescriptor {
        &self.output
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn warm_up(&mut self) -> Result<()> {
        let scores = self.run_zeros()?;
        if scores.len() != self.num_classes {
            return Err(HarkError::Inference(format!(
                "warm-up produced {} scores, expected {}",
                scores.len(),
                self.num_classes
            )));
        }
        debug!("ONNX classifier warm-up complete");
        Ok(())
    }

    fn run(&mut self, features: &FeatureTensor) -> Result<Vec<f32>> {
        self.run_array(features.view().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: FeatureShape = FeatureShape {
        frames: 49,
        coefficients: 10,
    };

    #[test]
    fn missing_file_is_reported_before_runtime_init() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.onnx");
        match OnnxClassifier::load(&path, SHAPE) {
            Err(HarkError::ModelNotFound { path: reported }) => assert_eq!(reported, path),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("absent model loaded"),
        }
    }

    #[test]
    fn directory_is_not_a_model() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            OnnxClassifier::load(dir.path(), SHAPE),
            Err(HarkError::ModelNotFound { .. })
        ));
    }
}
