//! Settings file loading and command-line overrides.
//!
//! A settings file is a JSON object with `PipelineConfig` keys. It is laid
//! over the selected preset (`PipelineConfig::from_file_over`), so it only
//! needs the keys that differ.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use hark_core::PipelineConfig;
use tracing::{debug, info};

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hark")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .filter(|p| p.is_absolute())
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("hark")
            .join("settings.json")
    }
}

/// Resolve the effective configuration.
///
/// `explicit` must exist if given. Without it the default settings path is
/// tried and silently skipped when absent.
pub fn load_config(explicit: Option<&Path>, preset: Option<&str>) -> Result<PipelineConfig> {
    let base = match preset {
        Some(name) => PipelineConfig::preset(name)
            .with_context(|| format!("unknown preset {name:?} (try one-second or two-second)"))?,
        None => PipelineConfig::one_second(),
    };

    let path = match explicit {
        Some(path) => {
            if !path.is_file() {
                bail!("settings file {} does not exist", path.display());
            }
            path.to_path_buf()
        }
        None => {
            let path = default_settings_path();
            if !path.is_file() {
                debug!(path = %path.display(), "no settings file; using preset defaults");
                return Ok(base);
            }
            path
        }
    };

    let config = PipelineConfig::from_file_over(&path, base)
        .with_context(|| format!("loading settings file {}", path.display()))?;
    info!(path = %path.display(), "settings loaded");
    Ok(config)
}

/// Command-line flags that take precedence over the settings file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub model: Option<PathBuf>,
    pub device: Option<String>,
    pub threshold: Option<f32>,
    pub store_raw_audio: bool,
}

impl Overrides {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(model) = &self.model {
            config.model_path = model.clone();
        }
        if let Some(device) = &self.device {
            config.input_device = Some(device.clone());
        }
        if let Some(threshold) = self.threshold {
            config.confidence_threshold = Some(threshold);
        }
        if self.store_raw_audio {
            config.store_raw_audio = true;
        }
    }
}
