//! Sample sources: anything that can hand the pipeline fixed-size int16 chunks.
//!
//! The pipeline only sees [`SampleSource`]. Two implementations ship:
//!
//! - [`CpalSource`]: live microphone via cpal (feature `audio-cpal`).
//! - [`ReplaySource`](replay::ReplaySource): in-memory samples or a WAV file.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS), so sources are not required to be `Send`. The pipeline receives a
//! [`SourceFactory`] instead and opens the source on its own thread.

#[cfg(feature = "audio-cpal")]
pub mod capture;
pub mod device;
pub mod persist;
pub mod replay;
pub mod resample;

#[cfg(feature = "audio-cpal")]
pub use capture::CpalSource;

use crate::buffering::chunk::SampleChunk;
use crate::error::Result;

/// Pull-based source of mono int16 chunks at a fixed sample rate.
pub trait SampleSource {
    /// Rate of the samples returned by `read` (Hz).
    fn sample_rate(&self) -> u32;

    /// Exact number of samples in every chunk returned by `read`.
    fn chunk_size(&self) -> usize;

    /// Block until `chunk_size` samples are available.
    ///
    /// # Errors
    /// A device error when the device disconnects, the stream reports an
    /// error, or the optional read timeout expires. Replay sources return
    /// `SourceExhausted` at end of data. A short chunk is never returned.
    fn read(&mut self) -> Result<SampleChunk>;

    /// Drop audio that was buffered but not yet read, so the next `read`
    /// starts from "now". Called at the top of every cycle.
    fn reset(&mut self) {}

    /// Release the device. Must be idempotent and safe after a failed `read`.
    fn close(&mut self);
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn chunk_size(&self) -> usize {
        (**self).chunk_size()
    }

    fn read(&mut self) -> Result<SampleChunk> {
        (**self).read()
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Opens a fresh source. Called once at start and again after every device error.
pub type SourceFactory = Box<dyn FnMut() -> Result<Box<dyn SampleSource>> + Send>;
