//! Live microphone capture via cpal.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** block on a mutex, perform I/O, or allocate after the first
//! callback. It converts whatever sample format the device delivers to mono
//! int16 and pushes into the SPSC ring; `read` drains the ring on the
//! pipeline thread, resampling there if the device could not open at the
//! configured rate.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::{resample::RateConverter, SampleSource};
use crate::{
    buffering::{
        chunk::SampleChunk, create_sample_ring, Consumer, Producer, SampleConsumer,
        SampleProducer,
    },
    error::{HarkError, Result},
};

/// How long `read` sleeps when the ring is empty.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Samples drained from the ring per poll.
const DRAIN_BLOCK: usize = 4096;

/// Handle to an open capture stream.
///
/// **Not `Send`**: create and drop it on the same OS thread.
pub struct CpalSource {
    /// `None` once closed.
    stream: Option<Stream>,
    consumer: SampleConsumer,
    /// Set to `false` to make the callback no-op.
    running: Arc<AtomicBool>,
    /// First error reported by the stream's error callback.
    failure: Arc<Mutex<Option<String>>>,
    /// Present only when the device runs at a different rate.
    resampler: Option<RateConverter>,
    pending: Vec<i16>,
    scratch: Vec<i16>,
    sample_rate: u32,
    chunk_size: usize,
    read_timeout: Option<Duration>,
}

impl CpalSource {
    /// Open the preferred input device (or the default, or the first available)
    /// delivering `chunk_size`-sample chunks at `sample_rate`.
    ///
    /// # Errors
    /// `NoDefaultInputDevice` when no input exists, `AudioDevice` /
    /// `AudioStream` when cpal cannot build or start the stream.
    pub fn open(
        sample_rate: u32,
        chunk_size: usize,
        preferred_device: Option<&str>,
        read_timeout: Option<Duration>,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(HarkError::config("chunk_size must be positive"));
        }

        let device = select_device(preferred_device)?;
        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let (config, format) = select_stream_config(&device, sample_rate)?;
        let device_rate = config.sample_rate.0;
        info!(
            device_rate,
            channels = config.channels,
            format = ?format,
            "audio config selected"
        );

        let (producer, consumer) = create_sample_ring();
        let running = Arc::new(AtomicBool::new(true));
        let failure = Arc::new(Mutex::new(None));

        let stream = match format {
            SampleFormat::I16 => build_stream::<i16>(
                &device,
                &config,
                producer,
                Arc::clone(&running),
                Arc::clone(&failure),
                |s| s,
            ),
            SampleFormat::F32 => build_stream::<f32>(
                &device,
                &config,
                producer,
                Arc::clone(&running),
                Arc::clone(&failure),
                |s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16,
            ),
            SampleFormat::U16 => build_stream::<u16>(
                &device,
                &config,
                producer,
                Arc::clone(&running),
                Arc::clone(&failure),
                |s| (s as i32 - 32_768) as i16,
            ),
            SampleFormat::U8 => build_stream::<u8>(
                &device,
                &config,
                producer,
                Arc::clone(&running),
                Arc::clone(&failure),
                |s| ((s as i16) - 128) << 8,
            ),
            fmt => {
                return Err(HarkError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| HarkError::AudioStream(e.to_string()))?;

        let resampler = if device_rate == sample_rate {
            None
        } else {
            warn!(
                device_rate,
                sample_rate, "device cannot open at the configured rate; resampling"
            );
            Some(RateConverter::new(device_rate, sample_rate, DRAIN_BLOCK)?)
        };

        Ok(Self {
            stream: Some(stream),
            consumer,
            running,
            failure,
            resampler,
            pending: Vec::with_capacity(chunk_size * 2),
            scratch: vec![0; DRAIN_BLOCK],
            sample_rate,
            chunk_size,
            read_timeout,
        })
    }

    /// Move whatever the callback has produced into `pending`.
    ///
    /// # Errors
    /// `AudioStream` if resampling fails; the samples drained so far are lost.
    fn drain_ring(&mut self) -> Result<usize> {
        let n = self.consumer.pop_slice(&mut self.scratch);
        if n == 0 {
            return Ok(0);
        }
        match self.resampler.as_mut() {
            Some(rc) => {
                let converted = rc.process_i16(&self.scratch[..n])?;
                self.pending.extend_from_slice(&converted);
            }
            None => self.pending.extend_from_slice(&self.scratch[..n]),
        }
        Ok(n)
    }
}

impl SampleSource for CpalSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn read(&mut self) -> Result<SampleChunk> {
        let started = Instant::now();
        loop {
            if self.stream.is_none() {
                return Err(HarkError::AudioDevice("source is closed".into()));
            }
            if let Some(reason) = self.failure.lock().clone() {
                return Err(HarkError::AudioStream(reason));
            }

            if self.pending.len() >= self.chunk_size {
                let samples: Vec<i16> = self.pending.drain(..self.chunk_size).collect();
                return Ok(SampleChunk::new(samples, self.sample_rate));
            }

            if self.drain_ring()? > 0 {
                continue;
            }

            if let Some(timeout) = self.read_timeout {
                let waited = started.elapsed();
                if waited >= timeout {
                    return Err(HarkError::DeviceTimeout {
                        waited_ms: waited.as_millis() as u64,
                    });
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn reset(&mut self) {
        let dropped = self.consumer.clear() + self.pending.len();
        self.pending.clear();
        if let Some(rc) = self.resampler.as_mut() {
            rc.reset();
        }
        if dropped > 0 {
            debug!(dropped, "discarded stale samples");
        }
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(stream) = self.stream.take() {
            // Stream drops here, releasing the device on this thread.
            drop(stream);
            info!("input device closed");
        }
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn select_device(preferred_name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    if let Some(preferred_name) = preferred_name {
        match host.input_devices() {
            Ok(mut devices) => {
                if let Some(device) = devices.find(|device| {
                    device
                        .name()
                        .map(|name| name == preferred_name)
                        .unwrap_or(false)
                }) {
                    return Ok(device);
                }
                warn!(
                    "preferred input device '{}' not found, falling back",
                    preferred_name
                );
            }
            Err(e) => {
                warn!("failed to list input devices while resolving preference: {e}");
            }
        }
    }

    if let Some(default) = host.default_input_device() {
        return Ok(default);
    }

    let mut devices = host
        .input_devices()
        .map_err(|e| HarkError::AudioDevice(e.to_string()))?;
    let fallback = devices.next().ok_or(HarkError::NoDefaultInputDevice)?;
    warn!("no default input device, falling back to first available input");
    Ok(fallback)
}

/// Prefer a native config at `sample_rate` (int16 first, fewest channels);
/// otherwise the device default, to be resampled on read.
fn select_stream_config(
    device: &cpal::Device,
    sample_rate: u32,
) -> Result<(StreamConfig, SampleFormat)> {
    let native = device
        .supported_input_configs()
        .map_err(|e| HarkError::AudioDevice(e.to_string()))?
        .filter(|range| {
            range.min_sample_rate().0 <= sample_rate && range.max_sample_rate().0 >= sample_rate
        })
        .min_by_key(|range| (format_rank(range.sample_format()), range.channels()));

    let supported = match native {
        Some(range) => range.with_sample_rate(SampleRate(sample_rate)),
        None => device
            .default_input_config()
            .map_err(|e| HarkError::AudioDevice(e.to_string()))?,
    };
    Ok((supported.config(), supported.sample_format()))
}

fn format_rank(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::I16 => 0,
        SampleFormat::F32 => 1,
        SampleFormat::U16 => 2,
        SampleFormat::U8 => 3,
        _ => u8::MAX,
    }
}

/// Build an input stream that downmixes `T` frames to mono int16.
fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: SampleProducer,
    running: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<String>>>,
    to_i16: fn(T) -> i16,
) -> Result<Stream>
where
    T: SizedSample + 'static,
{
    let channels = config.channels.max(1) as usize;
    let mut mix_buf: Vec<i16> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                let frames = data.len() / channels;
                mix_buf.resize(frames, 0);
                for (f, slot) in mix_buf.iter_mut().enumerate() {
                    let base = f * channels;
                    let sum: i32 = data[base..base + channels]
                        .iter()
                        .map(|s| to_i16(*s) as i32)
                        .sum();
                    *slot = (sum / channels as i32) as i16;
                }
                let written = producer.push_slice(&mix_buf);
                if written < mix_buf.len() {
                    warn!("ring buffer full: dropped {} frames", mix_buf.len() - written);
                }
            },
            move |err| {
                error!("audio stream error: {err}");
                let mut slot = failure.lock();
                if slot.is_none() {
                    *slot = Some(err.to_string());
                }
            },
            None,
        )
        .map_err(|e| HarkError::AudioStream(e.to_string()))
}
