//! Blocking pipeline loop.
//!
//! ## Pipeline stages (per cycle)
//!
//! ```text
//! 1. Reset the source (drop audio buffered during the previous cycle)
//! 2. Read chunks until one crosses the trigger threshold
//! 3. Capture the next `num_chunks` chunks into one window
//! 4. Optionally persist the window as WAV
//! 5. Extract features → infer → decide
//! 6. Publish the decision if it clears the confidence threshold
//! ```
//!
//! Stages never overlap: audio arriving during 4–6 is discarded by step 1
//! of the next cycle. The loop runs in `spawn_blocking` because every source
//! read blocks.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::{
    audio::{persist::RawAudioWriter, SampleSource, SourceFactory},
    buffering::capture,
    config::PipelineConfig,
    decision::{decide, Decision},
    error::{HarkError, Result},
    events::EngineStatus,
    features::FeatureExtractor,
    inference::ModelHandle,
    sink::ResultSink,
    trigger::wait_for_trigger,
};

use super::StatusCell;

/// First delay before reopening a failed source; doubles up to the max.
const REOPEN_BACKOFF_INITIAL: Duration = Duration::from_millis(250);
const REOPEN_BACKOFF_MAX: Duration = Duration::from_secs(8);
/// Granularity at which backoff sleeps notice a stop request.
const STOP_POLL: Duration = Duration::from_millis(50);

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub chunks_read: AtomicUsize,
    pub triggers: AtomicUsize,
    pub windows_captured: AtomicUsize,
    pub inferences: AtomicUsize,
    pub decisions_published: AtomicUsize,
    pub decisions_below_threshold: AtomicUsize,
    pub publish_errors: AtomicUsize,
    pub device_errors: AtomicUsize,
    pub cycle_errors: AtomicUsize,
    pub raw_windows_saved: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn counters(&self) -> [&AtomicUsize; 10] {
        [
            &self.chunks_read,
            &self.triggers,
            &self.windows_captured,
            &self.inferences,
            &self.decisions_published,
            &self.decisions_below_threshold,
            &self.publish_errors,
            &self.device_errors,
            &self.cycle_errors,
            &self.raw_windows_saved,
        ]
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            chunks_read: self.chunks_read.load(Ordering::Relaxed),
            triggers: self.triggers.load(Ordering::Relaxed),
            windows_captured: self.windows_captured.load(Ordering::Relaxed),
            inferences: self.inferences.load(Ordering::Relaxed),
            decisions_published: self.decisions_published.load(Ordering::Relaxed),
            decisions_below_threshold: self.decisions_below_threshold.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
            cycle_errors: self.cycle_errors.load(Ordering::Relaxed),
            raw_windows_saved: self.raw_windows_saved.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub chunks_read: usize,
    pub triggers: usize,
    pub windows_captured: usize,
    pub inferences: usize,
    pub decisions_published: usize,
    pub decisions_below_threshold: usize,
    pub publish_errors: usize,
    pub device_errors: usize,
    pub cycle_errors: usize,
    pub raw_windows_saved: usize,
}

/// All context the pipeline needs, passed as one struct so the closure stays tidy.
pub struct PipelineContext {
    pub config: PipelineConfig,
    pub window_samples: usize,
    pub num_chunks: usize,
    /// The open source. Not `Send`: the context is built on the pipeline thread.
    pub source: Box<dyn SampleSource>,
    /// Reopens the source after a device error.
    pub open_source: SourceFactory,
    pub extractor: Arc<FeatureExtractor>,
    pub model: ModelHandle,
    pub sink: Arc<dyn ResultSink>,
    pub raw_writer: Option<RawAudioWriter>,
    pub running: Arc<AtomicBool>,
    pub status: StatusCell,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// How one cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A decision cleared the threshold and was handed to the sink.
    Published(Decision),
    /// The top class was below the confidence threshold.
    BelowThreshold,
    /// Stop was requested while waiting for a trigger.
    Interrupted,
}

/// Run cycles until `ctx.running` is cleared, the source is exhausted, or a
/// fatal error occurs. Always closes the source before returning.
pub fn run(mut ctx: PipelineContext) {
    info!(
        window_samples = ctx.window_samples,
        num_chunks = ctx.num_chunks,
        trigger_threshold = ctx.config.trigger_threshold,
        "pipeline started"
    );

    let mut cycle = 0u64;
    let mut failed = false;

    while ctx.running.load(Ordering::Relaxed) {
        cycle += 1;
        let span = info_span!("cycle", cycle);
        let _entered = span.enter();

        match run_cycle(&mut ctx) {
            Ok(CycleOutcome::Interrupted) => break,
            Ok(_) => {}
            Err(HarkError::SourceExhausted) => {
                info!("sample source exhausted; stopping");
                break;
            }
            Err(e) if e.is_device_error() => {
                ctx.diagnostics.device_errors.fetch_add(1, Ordering::Relaxed);
                warn!("capture device error: {e}");
                ctx.source.close();
                if let Err(e) = reopen_source(&mut ctx) {
                    error!("could not reopen sample source: {e}");
                    ctx.status.set(EngineStatus::Error, Some(e.to_string()));
                    failed = true;
                    break;
                }
            }
            Err(e) if e.is_fatal() => {
                error!("stopping pipeline: {e}");
                ctx.status.set(EngineStatus::Error, Some(e.to_string()));
                failed = true;
                break;
            }
            Err(e) => {
                ctx.diagnostics.cycle_errors.fetch_add(1, Ordering::Relaxed);
                warn!("cycle failed: {e}");
            }
        }
    }

    ctx.source.close();
    ctx.running.store(false, Ordering::SeqCst);
    if !failed {
        ctx.status.set(EngineStatus::Stopped, None);
    }
    info!(cycles = cycle, "pipeline stopped");
}

/// One trigger → capture → classify → publish pass.
pub fn run_cycle(ctx: &mut PipelineContext) -> Result<CycleOutcome> {
    ctx.source.reset();
    ctx.status.set(EngineStatus::Listening, None);

    let Some(trigger) = wait_for_trigger(
        &mut *ctx.source,
        ctx.config.trigger_threshold,
        &ctx.running,
        &ctx.diagnostics.chunks_read,
    )?
    else {
        return Ok(CycleOutcome::Interrupted);
    };
    ctx.diagnostics.triggers.fetch_add(1, Ordering::Relaxed);
    info!(peak = trigger.peak(), "triggered; capturing window");

    ctx.status.set(EngineStatus::Recording, None);
    let captured_at = Local::now();
    let window = capture(&mut *ctx.source, ctx.num_chunks, ctx.window_samples)?;
    ctx.diagnostics
        .chunks_read
        .fetch_add(ctx.num_chunks, Ordering::Relaxed);
    ctx.diagnostics
        .windows_captured
        .fetch_add(1, Ordering::Relaxed);

    if let Some(writer) = ctx.raw_writer.as_ref() {
        match writer.write(&window, captured_at) {
            Ok(_) => {
                ctx.diagnostics
                    .raw_windows_saved
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!("failed to save raw audio: {e}"),
        }
    }

    let features = ctx.extractor.extract(&window)?;
    let probabilities = ctx.model.infer(&features)?;
    ctx.diagnostics.inferences.fetch_add(1, Ordering::Relaxed);
    debug!(probabilities = ?probabilities.as_slice(), "inference complete");

    let Some(decision) = decide(
        &probabilities,
        ctx.config.confidence_threshold,
        &ctx.config.label_list,
    ) else {
        ctx.diagnostics
            .decisions_below_threshold
            .fetch_add(1, Ordering::Relaxed);
        debug!(
            top = ?probabilities.argmax(),
            threshold = ?ctx.config.confidence_threshold,
            "decision below confidence threshold"
        );
        return Ok(CycleOutcome::BelowThreshold);
    };

    info!(
        class = %decision.label,
        class_index = decision.class_index,
        confidence = decision.confidence,
        "decision"
    );
    match ctx.sink.publish(&ctx.config.topic, &decision) {
        Ok(()) => {
            ctx.diagnostics
                .decisions_published
                .fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            ctx.diagnostics.publish_errors.fetch_add(1, Ordering::Relaxed);
            warn!("failed to publish decision: {e}");
        }
    }
    Ok(CycleOutcome::Published(decision))
}

/// Reopen the source with exponential backoff until it opens, the engine
/// is stopped, or the factory reports a configuration problem.
fn reopen_source(ctx: &mut PipelineContext) -> Result<()> {
    ctx.status
        .set(EngineStatus::Loading, Some("reopening sample source".into()));
    let mut backoff = REOPEN_BACKOFF_INITIAL;

    while ctx.running.load(Ordering::Relaxed) {
        sleep_unless_stopped(backoff, &ctx.running);
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }
        match (ctx.open_source)() {
            Ok(source) => {
                info!("sample source reopened");
                ctx.source = source;
                return Ok(());
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                ctx.diagnostics.device_errors.fetch_add(1, Ordering::Relaxed);
                warn!(retry_in_ms = backoff.as_millis() as u64, "reopen failed: {e}");
                backoff = (backoff * 2).min(REOPEN_BACKOFF_MAX);
            }
        }
    }
    Ok(())
}

fn sleep_unless_stopped(total: Duration, running: &AtomicBool) {
    let mut remaining = total;
    while !remaining.is_zero() && running.load(Ordering::Relaxed) {
        let step = remaining.min(STOP_POLL);
        std::thread::sleep(step);
        remaining -= step;
    }
}
