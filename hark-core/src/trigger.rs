//! Amplitude trigger.
//!
//! ## Algorithm
//!
//! 1. Compute the peak absolute sample of the incoming chunk.
//! 2. If peak ≥ `threshold` → triggered.
//! 3. Otherwise discard the chunk and read the next one.
//!
//! The detector keeps no state between chunks. The chunk that fires the
//! trigger is dropped: capture starts with the *next* chunk, so the attack
//! of the sound is not part of the window. Existing models were trained on
//! windows captured this way.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::debug;

use crate::audio::SampleSource;
use crate::buffering::chunk::SampleChunk;
use crate::error::Result;

/// `true` when the chunk's peak absolute amplitude reaches `threshold` (inclusive).
pub fn is_triggered(chunk: &SampleChunk, threshold: u16) -> bool {
    chunk.peak() >= threshold
}

/// Poll `source` until a chunk crosses `threshold`.
///
/// Returns the triggering chunk (for logging; it is not captured), or `None`
/// if `running` was cleared while waiting. `polled` counts every chunk read.
///
/// # Errors
/// Propagates read failures from the source.
pub fn wait_for_trigger(
    source: &mut dyn SampleSource,
    threshold: u16,
    running: &AtomicBool,
    polled: &AtomicUsize,
) -> Result<Option<SampleChunk>> {
    while running.load(Ordering::Relaxed) {
        let chunk = source.read()?;
        polled.fetch_add(1, Ordering::Relaxed);
        if is_triggered(&chunk, threshold) {
            debug!(peak = chunk.peak(), threshold, "trigger fired");
            return Ok(Some(chunk));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::replay::ReplaySource;
    use crate::error::HarkError;

    fn chunk(samples: Vec<i16>) -> SampleChunk {
        SampleChunk::new(samples, 44_100)
    }

    #[test]
    fn boundary_is_inclusive() {
        assert!(is_triggered(&chunk(vec![0, 500, 0]), 500));
        assert!(!is_triggered(&chunk(vec![0, 499, 0]), 500));
    }

    #[test]
    fn negative_peaks_count() {
        assert!(is_triggered(&chunk(vec![0, -500, 0]), 500));
        assert!(!is_triggered(&chunk(vec![0, -499, 0]), 500));
    }

    #[test]
    fn silence_never_triggers() {
        let mut source = ReplaySource::from_samples(vec![0; 4410 * 5], 44_100, 4410);
        let running = AtomicBool::new(true);
        let polled = AtomicUsize::new(0);

        let err = wait_for_trigger(&mut source, 500, &running, &polled).unwrap_err();
        assert!(matches!(err, HarkError::SourceExhausted));
        assert_eq!(polled.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn single_loud_sample_triggers_its_chunk() {
        let mut samples = vec![0i16; 4410 * 4];
        samples[4410 * 2 + 17] = 600;
        let mut source = ReplaySource::from_samples(samples, 44_100, 4410);
        let running = AtomicBool::new(true);
        let polled = AtomicUsize::new(0);

        let fired = wait_for_trigger(&mut source, 500, &running, &polled)
            .expect("read")
            .expect("trigger");
        assert_eq!(fired.peak(), 600);
        assert_eq!(polled.load(Ordering::Relaxed), 3);
        // The triggering chunk is consumed; capture would start at chunk 4.
        assert_eq!(source.remaining(), 4410);
    }

    #[test]
    fn cleared_running_flag_stops_waiting() {
        let mut source = ReplaySource::from_samples(vec![0; 4410], 44_100, 4410);
        let running = AtomicBool::new(false);
        let polled = AtomicUsize::new(0);
        assert!(wait_for_trigger(&mut source, 500, &running, &polled)
            .expect("no read")
            .is_none());
        assert_eq!(polled.load(Ordering::Relaxed), 0);
    }
}
