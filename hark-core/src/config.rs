//! Pipeline configuration.
//!
//! One parameterised struct covers every capture variant. The two deployed
//! variants are available as presets:
//!
//! | Preset       | window | trigger | frame_length | frame_step | frames |
//! |--------------|--------|---------|--------------|------------|--------|
//! | `one_second` | 1 s    | 500     | 1764         | 882        | 49     |
//! | `two_second` | 2 s    | 1000    | 3528         | 1764       | 49     |

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HarkError, Result};

pub const DEFAULT_TOPIC: &str = "/R0001/alerts";

/// Labels of the deployed classifier, in output-index order.
pub const DEFAULT_LABELS: &[&str] = &[
    "Bark", "Crash", "Door", "Doorbell", "Drill", "Speech", "Other",
];

/// Short-time spectral analysis parameters. These must match what the model
/// was trained with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub frame_length: usize,
    pub frame_step: usize,
    pub num_mel_bins: usize,
    pub frequency_low: f32,
    pub frequency_high: f32,
    pub num_coefficients: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            frame_length: 1764,
            frame_step: 882,
            num_mel_bins: 40,
            frequency_low: 20.0,
            frequency_high: 4000.0,
            num_coefficients: 10,
        }
    }
}

/// Full configuration of the detect → capture → classify loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Samples per device read.
    pub chunk_size: usize,
    /// Capture rate in Hz.
    pub sample_rate: u32,
    /// Capture window duration after a trigger.
    pub window_seconds: f32,
    /// Peak absolute amplitude (int16 scale) that starts a capture.
    pub trigger_threshold: u16,
    /// Minimum top-class probability for a decision to be published.
    /// Omitted from a settings file (or `null`) means every decision is published.
    #[serde(default)]
    pub confidence_threshold: Option<f32>,
    pub model_path: PathBuf,
    pub label_list: Vec<String>,
    #[serde(flatten)]
    pub features: FeatureConfig,
    pub store_raw_audio: bool,
    pub raw_audio_dir: PathBuf,
    pub topic: String,
    /// Preferred capture device name; `None` uses the system default.
    pub input_device: Option<String>,
    /// Device read timeout; `None` blocks indefinitely.
    pub read_timeout_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::one_second()
    }
}

impl PipelineConfig {
    /// 1-second capture at 44.1 kHz.
    pub fn one_second() -> Self {
        Self {
            chunk_size: 4410,
            sample_rate: 44_100,
            window_seconds: 1.0,
            trigger_threshold: 500,
            confidence_threshold: Some(0.8),
            model_path: PathBuf::from("models/model.onnx"),
            label_list: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
            features: FeatureConfig::default(),
            store_raw_audio: false,
            raw_audio_dir: PathBuf::from("recordings"),
            topic: DEFAULT_TOPIC.to_string(),
            input_device: None,
            read_timeout_ms: Some(5_000),
        }
    }

    /// 2-second capture at 44.1 kHz with doubled frame parameters.
    pub fn two_second() -> Self {
        Self {
            window_seconds: 2.0,
            trigger_threshold: 1000,
            features: FeatureConfig {
                frame_length: 3528,
                frame_step: 1764,
                ..FeatureConfig::default()
            },
            ..Self::one_second()
        }
    }

    /// Resolve a preset by name (`one-second`, `two-second`, and a few aliases).
    pub fn preset(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "one-second" | "one_second" | "1s" | "1" => Some(Self::one_second()),
            "two-second" | "two_second" | "2s" | "2" => Some(Self::two_second()),
            _ => None,
        }
    }

    /// Lay the keys of a JSON settings object over `base`.
    ///
    /// Keys the object leaves out keep `base`'s value, except
    /// `confidence_threshold`: omitting it publishes every decision, the
    /// same as `"confidence_threshold": null`.
    pub fn overlay_json(base: Self, raw: &str) -> Result<Self> {
        let Value::Object(file) = serde_json::from_str::<Value>(raw)
            .map_err(|e| HarkError::config(format!("settings: {e}")))?
        else {
            return Err(HarkError::config("settings must be a JSON object"));
        };
        let Value::Object(mut merged) =
            serde_json::to_value(&base).map_err(|e| HarkError::config(e.to_string()))?
        else {
            return Err(HarkError::config("configuration did not serialise to an object"));
        };
        merged.insert("confidence_threshold".into(), Value::Null);
        merged.extend(file);
        serde_json::from_value(Value::Object(merged))
            .map_err(|e| HarkError::config(format!("settings: {e}")))
    }

    /// Read a JSON settings file and lay it over `base`.
    pub fn from_file_over(path: &Path, base: Self) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::overlay_json(base, &raw)
            .map_err(|e| HarkError::config(format!("{}: {e}", path.display())))
    }

    /// Number of samples in one capture window.
    ///
    /// # Errors
    /// `Config` when `sample_rate × window_seconds` is not a positive whole number.
    pub fn window_samples(&self) -> Result<usize> {
        let exact = self.sample_rate as f64 * self.window_seconds as f64;
        let rounded = exact.round();
        if rounded < 1.0 || (exact - rounded).abs() > 1e-3 {
            return Err(HarkError::config(format!(
                "sample_rate {} × window_seconds {} is not a whole number of samples",
                self.sample_rate, self.window_seconds
            )));
        }
        Ok(rounded as usize)
    }

    /// Chunks read per capture: `ceil(sample_rate / chunk_size × window_seconds)`.
    pub fn chunks_per_window(&self) -> Result<usize> {
        let window = self.window_samples()?;
        if self.chunk_size == 0 {
            return Err(HarkError::config("chunk_size must be positive"));
        }
        Ok(window.div_ceil(self.chunk_size))
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    /// Checks everything that can be checked without the model.
    ///
    /// Frame geometry is validated separately when the feature extractor is
    /// built, since it depends on the window length.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(HarkError::config("sample_rate must be positive"));
        }
        if !(self.window_seconds.is_finite() && self.window_seconds > 0.0) {
            return Err(HarkError::config("window_seconds must be positive"));
        }
        self.chunks_per_window()?;
        if let Some(threshold) = self.confidence_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(HarkError::config(format!(
                    "confidence_threshold {threshold} is outside [0, 1]"
                )));
            }
        }
        if self.label_list.is_empty() {
            return Err(HarkError::config("label_list must not be empty"));
        }
        if self.label_list.iter().any(|l| l.trim().is_empty()) {
            return Err(HarkError::config("label_list contains an empty label"));
        }
        if self.topic.trim().is_empty() {
            return Err(HarkError::config("topic must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_deployed_variants() {
        let one = PipelineConfig::one_second();
        assert_eq!(one.window_samples().unwrap(), 44_100);
        assert_eq!(one.chunks_per_window().unwrap(), 10);
        assert_eq!(one.trigger_threshold, 500);

        let two = PipelineConfig::two_second();
        assert_eq!(two.window_samples().unwrap(), 88_200);
        assert_eq!(two.chunks_per_window().unwrap(), 20);
        assert_eq!(two.trigger_threshold, 1000);
        assert_eq!(two.features.frame_length, 3528);
        assert_eq!(two.features.frame_step, 1764);
    }

    #[test]
    fn chunks_per_window_rounds_up() {
        let config = PipelineConfig {
            chunk_size: 4096,
            ..PipelineConfig::one_second()
        };
        // 44100 / 4096 = 10.77 → 11 reads
        assert_eq!(config.chunks_per_window().unwrap(), 11);
    }

    #[test]
    fn fractional_window_is_rejected() {
        let config = PipelineConfig {
            sample_rate: 44_100,
            window_seconds: 0.33333,
            ..PipelineConfig::one_second()
        };
        assert!(config.window_samples().unwrap_err().is_config_error());
    }

    #[test]
    fn missing_confidence_threshold_means_always_publish() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "trigger_threshold": 700 }"#).expect("parse settings");
        assert_eq!(config.trigger_threshold, 700);
        assert_eq!(config.confidence_threshold, None);
        assert_eq!(config.chunk_size, 4410);
        assert_eq!(config.features.frame_length, 1764);
    }

    #[test]
    fn flattened_feature_keys_parse() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{ "frame_length": 3528, "frame_step": 1764, "confidence_threshold": 0.8 }"#,
        )
        .expect("parse settings");
        assert_eq!(config.features.frame_length, 3528);
        assert_eq!(config.features.frame_step, 1764);
        assert_eq!(config.confidence_threshold, Some(0.8));
    }

    #[test]
    fn validate_rejects_out_of_range_confidence() {
        let config = PipelineConfig {
            confidence_threshold: Some(1.5),
            ..PipelineConfig::one_second()
        };
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn overlay_keeps_base_values_for_missing_keys() {
        let config = PipelineConfig::overlay_json(
            PipelineConfig::two_second(),
            r#"{ "topic": "/R0002/alerts", "confidence_threshold": 0.6 }"#,
        )
        .unwrap();
        assert_eq!(config.topic, "/R0002/alerts");
        assert_eq!(config.confidence_threshold, Some(0.6));
        assert_eq!(config.window_seconds, 2.0);
        assert_eq!(config.features.frame_length, 3528);
    }

    #[test]
    fn omitted_confidence_threshold_publishes_everything() {
        let config =
            PipelineConfig::overlay_json(PipelineConfig::one_second(), r#"{ "chunk_size": 2205 }"#)
                .unwrap();
        assert_eq!(config.confidence_threshold, None);
        assert_eq!(config.chunk_size, 2205);
    }

    #[test]
    fn malformed_settings_are_config_errors() {
        for raw in ["[1, 2]", r#"{ "sample_rate": "fast" }"#, "{"] {
            let err = PipelineConfig::overlay_json(PipelineConfig::one_second(), raw).unwrap_err();
            assert!(err.is_config_error(), "{raw}: {err}");
        }
    }

    #[test]
    fn settings_file_is_read_over_base() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "trigger_threshold": 750 }"#).unwrap();
        let loaded =
            PipelineConfig::from_file_over(&path, PipelineConfig::two_second()).expect("load");
        assert_eq!(loaded.trigger_threshold, 750);
        assert_eq!(loaded.features.frame_step, 1764);
    }

    #[test]
    fn preset_lookup_accepts_aliases() {
        assert_eq!(
            PipelineConfig::preset("Two-Second"),
            Some(PipelineConfig::two_second())
        );
        assert!(PipelineConfig::preset("three").is_none());
    }
}
