//! Sample buffering: the lock-free ring between the audio callback and the
//! pipeline thread, and the window recorder that assembles a capture.
//!
//! The ring uses `ringbuf::HeapRb<i16>`, whose `push_slice` is wait-free and
//! safe to call from the real-time audio callback.

pub mod chunk;

use ringbuf::{traits::Split, HeapRb};
use tracing::debug;

pub use ringbuf::traits::{Consumer, Producer};

use crate::audio::SampleSource;
use crate::error::{HarkError, Result};
use chunk::AudioWindow;

/// Producer half, held by the audio callback thread.
pub type SampleProducer = ringbuf::HeapProd<i16>;

/// Consumer half, held by the pipeline thread.
pub type SampleConsumer = ringbuf::HeapCons<i16>;

/// Ring capacity: 2^20 samples ≈ 23.8 s at 44.1 kHz. Covers the longest
/// extraction + inference stall without the callback dropping audio.
pub const RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_sample_ring() -> (SampleProducer, SampleConsumer) {
    HeapRb::<i16>::new(RING_CAPACITY).split()
}

/// Read `num_chunks` chunks from `source` and concatenate them into a window
/// of exactly `window_samples` samples.
///
/// When `chunk_size` does not divide the window the final chunk overshoots
/// and the excess tail is dropped. Any read failure discards everything read
/// so far and propagates the error.
///
/// # Errors
/// `Config` if the chunks cannot cover `window_samples`; otherwise whatever
/// the source's `read` returns.
pub fn capture(
    source: &mut dyn SampleSource,
    num_chunks: usize,
    window_samples: usize,
) -> Result<AudioWindow> {
    let chunk_size = source.chunk_size();
    if num_chunks.saturating_mul(chunk_size) < window_samples {
        return Err(HarkError::config(format!(
            "{num_chunks} chunks of {chunk_size} samples cannot fill a {window_samples}-sample window"
        )));
    }

    let mut samples = Vec::with_capacity(num_chunks * chunk_size);
    for index in 0..num_chunks {
        let chunk = source.read()?;
        debug!(index, peak = chunk.peak(), "captured chunk");
        samples.extend_from_slice(&chunk.samples);
    }
    samples.truncate(window_samples);

    Ok(AudioWindow::new(samples, source.sample_rate()))
}
