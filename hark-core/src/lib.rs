//! # hark-core
//!
//! Amplitude-triggered acoustic event classifier.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CpalSource → SPSC RingBuffer ─┐
//! WAV file   → ReplaySource ─────────────────┤
//!                                             ▼
//!                        Pipeline (spawn_blocking), one cycle at a time:
//!                                             │
//!                     trigger: peak |sample| ≥ threshold
//!                                             │
//!                     capture: next N chunks → AudioWindow
//!                                             │
//!                     features: STFT → mel → log → DCT → [1, T, 10, 1]
//!                                             │
//!                     Classifier::run → softmax → decide
//!                                             │
//!                               ResultSink::publish(topic, Decision)
//! ```
//!
//! The audio callback is zero-alloc. All heap work happens in the pipeline thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod events;
pub mod features;
pub mod inference;
pub mod sink;
pub mod trigger;

// Convenience re-exports for downstream crates
pub use audio::{replay::ReplaySource, SampleSource, SourceFactory};
pub use buffering::chunk::{AudioWindow, SampleChunk};
pub use config::{FeatureConfig, PipelineConfig};
pub use decision::Decision;
pub use engine::{DiagnosticsSnapshot, Engine};
pub use error::{HarkError, Result};
pub use events::{DecisionEnvelope, EngineStatus, EngineStatusEvent};
pub use features::{FeatureExtractor, FeatureShape, FeatureTensor};
pub use inference::{ClassProbabilities, Classifier, ModelHandle, StubClassifier};
pub use sink::{BroadcastSink, JsonLinesSink, ResultSink};

#[cfg(feature = "audio-cpal")]
pub use audio::CpalSource;

#[cfg(feature = "onnx")]
pub use inference::OnnxClassifier;
