//! Optional raw-audio persistence for captured windows.
//!
//! Purely diagnostic: the files are never read back by the pipeline.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::debug;

use crate::buffering::chunk::AudioWindow;
use crate::error::Result;

/// File name template, expanded with the capture's local timestamp.
const FILE_NAME_FORMAT: &str = "capture_%Y%m%d_%H%M%S_%3f.wav";

/// Writes each captured window as a mono 16-bit PCM WAV file.
#[derive(Debug, Clone)]
pub struct RawAudioWriter {
    dir: PathBuf,
}

impl RawAudioWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, captured_at: DateTime<Local>) -> PathBuf {
        self.dir
            .join(captured_at.format(FILE_NAME_FORMAT).to_string())
    }

    /// Write `window` and return the file path.
    pub fn write(&self, window: &AudioWindow, captured_at: DateTime<Local>) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(captured_at);

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: window.sample_rate(),
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)?;
        for &sample in window.samples() {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;

        debug!(path = %path.display(), samples = window.len(), "raw audio saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::replay::read_wav_mono16;
    use chrono::TimeZone;

    #[test]
    fn file_name_is_templated_by_timestamp() {
        let writer = RawAudioWriter::new("recordings");
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            writer.path_for(at),
            PathBuf::from("recordings").join("capture_20240309_140507_000.wav")
        );
    }

    #[test]
    fn written_window_reads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = RawAudioWriter::new(dir.path().join("raw"));
        let samples: Vec<i16> = (0..441).map(|i| (i * 50 - 10_000) as i16).collect();
        let window = AudioWindow::from_samples(samples.clone(), 44_100);

        let path = writer.write(&window, Local::now()).expect("write window");
        let (read_back, rate) = read_wav_mono16(&path).expect("read window");
        assert_eq!(rate, 44_100);
        assert_eq!(read_back, samples);
    }
}
