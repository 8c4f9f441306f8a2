//! `StubClassifier`: returns the same scores for every input.
//!
//! Lets the pipeline run end-to-end (replay files, integration tests)
//! without a model file or the ONNX runtime.

use tracing::debug;

use crate::error::Result;
use crate::features::{FeatureShape, FeatureTensor};
use crate::inference::{Classifier, TensorDescriptor};

pub struct StubClassifier {
    input: TensorDescriptor,
    output: TensorDescriptor,
    logits: Vec<f32>,
}

impl StubClassifier {
    /// Accepts tensors of `shape` and answers `logits` for each of them.
    pub fn new(shape: FeatureShape, logits: Vec<f32>) -> Self {
        Self {
            input: TensorDescriptor::new("features", shape.dims().to_vec()),
            output: TensorDescriptor::new("scores", vec![1, logits.len() as i64]),
            logits,
        }
    }

    /// Uniform scores over `num_classes`.
    pub fn uniform(shape: FeatureShape, num_classes: usize) -> Self {
        Self::new(shape, vec![0.0; num_classes])
    }
}

impl Classifier for StubClassifier {
    fn input(&self) -> &TensorDescriptor {
        &self.input
    }

    fn output(&self) -> &TensorDescriptor {
        &self.output
    }

    fn num_classes(&self) -> usize {
        self.logits.len()
    }

    fn warm_up(&mut self) -> Result<()> {
        debug!("StubClassifier::warm_up is a no-op");
        Ok(())
    }

    fn run(&mut self, _features: &FeatureTensor) -> Result<Vec<f32>> {
        Ok(self.logits.clone())
    }
}
