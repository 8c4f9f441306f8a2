//! Classifier abstraction.
//!
//! The `Classifier` trait decouples the pipeline from the model runtime
//! (ONNX via `ort`, or the fixed-logit stub). `run` takes `&mut self`
//! because sessions own scratch buffers; all calls are serialised through
//! `ModelHandle`'s `parking_lot::Mutex`.

pub mod stub;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;
pub use stub::StubClassifier;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{HarkError, Result};
use crate::features::{FeatureShape, FeatureTensor};

/// Name, dims and element type of a model input or output. `-1` marks a
/// dynamic dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TensorDescriptor {
    pub name: String,
    pub shape: Vec<i64>,
    pub element_type: String,
}

impl TensorDescriptor {
    /// An f32 tensor.
    pub fn new(name: impl Into<String>, shape: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            shape,
            element_type: "f32".into(),
        }
    }

    pub fn with_element_type(mut self, element_type: impl Into<String>) -> Self {
        self.element_type = element_type.into();
        self
    }

    /// Whether a `[1, T, C, 1]` tensor of `features` fits this descriptor.
    pub fn accepts(&self, features: FeatureShape) -> bool {
        let expected = features.dims();
        self.shape.len() == expected.len()
            && self
                .shape
                .iter()
                .zip(expected)
                .all(|(&dim, want)| dim < 0 || dim == want)
    }

    /// # Errors
    /// `ModelShapeMismatch` if [`accepts`](Self::accepts) is false.
    pub fn check_accepts(&self, features: FeatureShape) -> Result<()> {
        if self.accepts(features) {
            Ok(())
        } else {
            Err(HarkError::ModelShapeMismatch {
                expected: features.dims().to_vec(),
                found: self.shape.clone(),
            })
        }
    }

    /// Last dimension, if static.
    pub fn last_static_dim(&self) -> Option<usize> {
        self.shape
            .last()
            .copied()
            .filter(|&d| d > 0)
            .map(|d| d as usize)
    }
}

/// Contract for classification backends.
pub trait Classifier: Send + 'static {
    fn input(&self) -> &TensorDescriptor;

    fn output(&self) -> &TensorDescriptor;

    /// Length of the score vector returned by [`run`](Self::run).
    fn num_classes(&self) -> usize;

    /// Run one dummy inference so the first real cycle does not pay for
    /// lazy initialisation. Called once at engine startup.
    fn warm_up(&mut self) -> Result<()>;

    /// Raw per-class scores for one feature tensor.
    fn run(&mut self, features: &FeatureTensor) -> Result<Vec<f32>>;
}

/// Per-class probabilities, in model output order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities(Vec<f32>);

impl ClassProbabilities {
    /// Numerically stable softmax.
    pub fn from_logits(logits: &[f32]) -> Self {
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
        let sum: f32 = exps.iter().sum();
        Self(exps.into_iter().map(|e| e / sum).collect())
    }

    /// Already-normalised probabilities.
    pub fn from_probabilities(probs: Vec<f32>) -> Self {
        Self(probs)
    }

    /// Index and probability of the most likely class. Ties resolve to the
    /// lowest index.
    pub fn argmax(&self) -> Option<(usize, f32)> {
        self.0
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best, (i, p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((i, p)),
            })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Thread-safe reference-counted handle to any `Classifier`.
#[derive(Clone)]
pub struct ModelHandle(pub Arc<Mutex<dyn Classifier>>);

impl ModelHandle {
    pub fn new<C: Classifier>(classifier: C) -> Self {
        Self(Arc::new(Mutex::new(classifier)))
    }

    pub fn input(&self) -> TensorDescriptor {
        self.0.lock().input().clone()
    }

    pub fn num_classes(&self) -> usize {
        self.0.lock().num_classes()
    }

    pub fn warm_up(&self) -> Result<()> {
        self.0.lock().warm_up()
    }

    /// Classify one feature tensor. Holds the model lock for the whole call.
    ///
    /// # Errors
    /// `Inference` if the tensor does not fit the model input, the backend
    /// fails, or the score vector has the wrong length or a non-finite entry.
    pub fn infer(&self, features: &FeatureTensor) -> Result<ClassProbabilities> {
        let mut classifier = self.0.lock();
        if !classifier.input().accepts(features.shape()) {
            return Err(HarkError::Inference(format!(
                "feature tensor {:?} does not fit model input {:?}",
                features.shape().dims(),
                classifier.input().shape
            )));
        }
        let logits = classifier.run(features)?;
        if logits.len() != classifier.num_classes() || logits.is_empty() {
            return Err(HarkError::Inference(format!(
                "model returned {} scores, expected {}",
                logits.len(),
                classifier.num_classes()
            )));
        }
        if let Some(i) = logits.iter().position(|l| !l.is_finite()) {
            return Err(HarkError::Inference(format!(
                "model returned non-finite score {} for class {i}",
                logits[i]
            )));
        }
        Ok(ClassProbabilities::from_logits(&logits))
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array4;

    const SHAPE: FeatureShape = FeatureShape {
        frames: 49,
        coefficients: 10,
    };

    #[test]
    fn softmax_sums_to_one_and_survives_large_logits() {
        let probs = ClassProbabilities::from_logits(&[1000.0, 1001.0, 999.0]);
        let sum: f32 = probs.as_slice().iter().sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
        assert!(probs.as_slice().iter().all(|p| p.is_finite()));
        assert_eq!(probs.argmax().map(|(i, _)| i), Some(1));
    }

    #[test]
    fn argmax_ties_pick_lowest_index() {
        let probs = ClassProbabilities::from_probabilities(vec![0.2, 0.4, 0.4]);
        assert_eq!(probs.argmax(), Some((1, 0.4)));
        assert_eq!(ClassProbabilities::from_probabilities(vec![]).argmax(), None);
    }

    #[test]
    fn descriptor_treats_negative_dims_as_wildcards() {
        assert!(TensorDescriptor::new("x", vec![1, 49, 10, 1]).accepts(SHAPE));
        assert!(TensorDescriptor::new("x", vec![-1, 49, 10, 1]).accepts(SHAPE));
        assert!(!TensorDescriptor::new("x", vec![1, 50, 10, 1]).accepts(SHAPE));
        assert!(!TensorDescriptor::new("x", vec![1, 49, 10]).accepts(SHAPE));

        let err = TensorDescriptor::new("x", vec![1, 98, 10, 1])
            .check_accepts(SHAPE)
            .unwrap_err();
        assert!(err.is_model_load_error());
    }

    #[test]
    fn handle_applies_softmax_to_backend_scores() {
        let handle = ModelHandle::new(StubClassifier::new(SHAPE, vec![0.0, 2.0, 0.0]));
        let tensor = FeatureTensor::from_array(Array4::zeros((1, 49, 10, 1))).unwrap();
        let probs = handle.infer(&tensor).unwrap();
        assert_eq!(probs.len(), 3);
        assert_eq!(probs.argmax().map(|(i, _)| i), Some(1));
    }

    #[test]
    fn handle_rejects_non_finite_scores() {
        let tensor = FeatureTensor::from_array(Array4::zeros((1, 49, 10, 1))).unwrap();
        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let handle = ModelHandle::new(StubClassifier::new(SHAPE, vec![bad, 0.0, 0.0]));
            assert!(matches!(
                handle.infer(&tensor),
                Err(HarkError::Inference(_))
            ));
        }
    }

    #[test]
    fn handle_rejects_mismatched_tensor() {
        let handle = ModelHandle::new(StubClassifier::new(SHAPE, vec![0.0, 1.0]));
        let tensor = FeatureTensor::from_array(Array4::zeros((1, 98, 10, 1))).unwrap();
        assert!(matches!(
            handle.infer(&tensor),
            Err(HarkError::Inference(_))
        ));
    }
}
