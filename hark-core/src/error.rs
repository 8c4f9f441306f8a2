use std::path::PathBuf;

use thiserror::Error;

/// All errors produced by hark-core.
///
/// The variants fall into four groups that the pipeline treats differently:
///
/// | Group       | Variants                                                   | Effect                       |
/// |-------------|------------------------------------------------------------|------------------------------|
/// | device      | `AudioDevice`, `AudioStream`, `NoDefaultInputDevice`, `DeviceTimeout` | abort cycle, reopen source |
/// | config      | `Config`                                                   | abort before the first cycle |
/// | model load  | `ModelNotFound`, `ModelMalformed`, `ModelShapeMismatch`    | abort before the first cycle |
/// | cycle       | `Inference`, `Io`, `Wav`, ...                              | abort cycle, keep listening  |
#[derive(Debug, Error)]
pub enum HarkError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("audio device produced no data for {waited_ms} ms")]
    DeviceTimeout { waited_ms: u64 },

    /// A replay source ran out of samples. Not a fault: the pipeline stops cleanly.
    #[error("sample source exhausted")]
    SourceExhausted,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: PathBuf },

    #[error("model file {path} could not be parsed: {reason}")]
    ModelMalformed { path: PathBuf, reason: String },

    #[error("model input shape {found:?} does not match feature shape {expected:?}")]
    ModelShapeMismatch { expected: Vec<i64>, found: Vec<i64> },

    #[error("inference error: {0}")]
    Inference(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HarkError {
    pub fn config(msg: impl Into<String>) -> Self {
        HarkError::Config(msg.into())
    }

    /// Capture device unavailable, disconnected, or timed out.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            HarkError::AudioDevice(_)
                | HarkError::AudioStream(_)
                | HarkError::NoDefaultInputDevice
                | HarkError::DeviceTimeout { .. }
        )
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self, HarkError::Config(_))
    }

    pub fn is_model_load_error(&self) -> bool {
        matches!(
            self,
            HarkError::ModelNotFound { .. }
                | HarkError::ModelMalformed { .. }
                | HarkError::ModelShapeMismatch { .. }
        )
    }

    /// Errors that must stop the process rather than just the current cycle.
    pub fn is_fatal(&self) -> bool {
        self.is_config_error() || self.is_model_load_error()
    }
}

pub type Result<T> = std::result::Result<T, HarkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_error_groups() {
        assert!(HarkError::DeviceTimeout { waited_ms: 10 }.is_device_error());
        assert!(HarkError::NoDefaultInputDevice.is_device_error());
        assert!(!HarkError::SourceExhausted.is_device_error());

        assert!(HarkError::config("bad").is_fatal());
        assert!(HarkError::ModelNotFound {
            path: PathBuf::from("missing.onnx")
        }
        .is_model_load_error());
        assert!(!HarkError::Inference("boom".into()).is_fatal());
    }
}
