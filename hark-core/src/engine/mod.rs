//! `Engine`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! Engine::new()          → config, extractor and model validated, status = Idle
//!     └─► warm_up()      → dummy inference, status = Loading → Idle
//!         └─► start()    → source opened, pipeline spawned, status = Listening
//!             └─► stop() → running=false, source closed, status = Stopped
//! ```
//!
//! Everything that can be checked without audio is checked in `new`, so a
//! bad model or configuration never reaches the first cycle.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send`. The source is therefore opened *inside* the
//! `spawn_blocking` closure via a [`SourceFactory`], and a sync oneshot
//! channel propagates the open result back to the `start()` caller.

pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    audio::{persist::RawAudioWriter, SampleSource, SourceFactory},
    buffering::chunk::AudioWindow,
    config::PipelineConfig,
    decision::{decide, Decision},
    error::{HarkError, Result},
    events::{EngineStatus, EngineStatusEvent},
    features::{FeatureExtractor, FeatureShape},
    inference::{ClassProbabilities, ModelHandle},
    sink::ResultSink,
};

pub use pipeline::DiagnosticsSnapshot;

/// Broadcast channel capacity for status events.
const STATUS_CHANNEL_CAP: usize = 64;

/// Current status plus the channel that announces changes.
#[derive(Clone)]
pub struct StatusCell {
    current: Arc<Mutex<EngineStatus>>,
    tx: broadcast::Sender<EngineStatusEvent>,
}

impl StatusCell {
    pub fn new(tx: broadcast::Sender<EngineStatusEvent>) -> Self {
        Self {
            current: Arc::new(Mutex::new(EngineStatus::Idle)),
            tx,
        }
    }

    pub fn get(&self) -> EngineStatus {
        *self.current.lock()
    }

    /// Record `status`; broadcast only if it changed or carries a detail.
    pub fn set(&self, status: EngineStatus, detail: Option<String>) {
        let changed = {
            let mut current = self.current.lock();
            let changed = *current != status;
            *current = status;
            changed
        };
        if changed || detail.is_some() {
            let _ = self.tx.send(EngineStatusEvent { status, detail });
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.tx.subscribe()
    }
}

/// The top-level engine handle. `Send + Sync`; share it behind an `Arc`.
pub struct Engine {
    config: PipelineConfig,
    model: ModelHandle,
    sink: Arc<dyn ResultSink>,
    extractor: Arc<FeatureExtractor>,
    window_samples: usize,
    num_chunks: usize,
    /// `true` while the pipeline thread is active.
    running: Arc<AtomicBool>,
    status: StatusCell,
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Validate `config` against `model` and build the feature extractor.
    ///
    /// # Errors
    /// - `Config` for invalid settings, frame geometry that does not tile the
    ///   window, or a label list whose length differs from the class count
    /// - `ModelShapeMismatch` if the model input cannot take the feature tensor
    pub fn new(
        config: PipelineConfig,
        model: ModelHandle,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self> {
        config.validate()?;
        let window_samples = config.window_samples()?;
        let num_chunks = config.chunks_per_window()?;
        let extractor = FeatureExtractor::new(config.sample_rate, window_samples, &config.features)?;

        model.input().check_accepts(extractor.shape())?;
        let num_classes = model.num_classes();
        if num_classes != config.label_list.len() {
            return Err(HarkError::config(format!(
                "model has {num_classes} classes but label_list has {} labels",
                config.label_list.len()
            )));
        }

        info!(
            window_samples,
            num_chunks,
            frames = extractor.shape().frames,
            num_classes,
            "engine configured"
        );

        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAP);
        Ok(Self {
            config,
            model,
            sink,
            extractor: Arc::new(extractor),
            window_samples,
            num_chunks,
            running: Arc::new(AtomicBool::new(false)),
            status: StatusCell::new(status_tx),
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
            worker: Mutex::new(None),
        })
    }

    /// Run one dummy inference. Call once before `start()`.
    pub fn warm_up(&self) -> Result<()> {
        self.status.set(EngineStatus::Loading, None);
        info!("warming up classifier");
        match self.model.warm_up() {
            Ok(()) => {
                self.status.set(EngineStatus::Idle, None);
                info!("classifier ready");
                Ok(())
            }
            Err(e) => {
                self.status.set(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Open a source with `open_source` on the pipeline thread and start cycling.
    ///
    /// Blocks until the source is open (or fails to open). The factory is
    /// kept and called again whenever the source reports a device error.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - `AlreadyRunning` if already started, or if a stopped pipeline has
    ///   not exited yet (`join()` first).
    /// - Whatever the factory returns on the first open.
    pub fn start(&self, mut open_source: SourceFactory) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(HarkError::AlreadyRunning);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HarkError::AlreadyRunning);
        }

        self.diagnostics.reset();
        self.status.set(EngineStatus::Loading, None);

        let config = self.config.clone();
        let window_samples = self.window_samples;
        let num_chunks = self.num_chunks;
        let extractor = Arc::clone(&self.extractor);
        let model = self.model.clone();
        let sink = Arc::clone(&self.sink);
        let running = Arc::clone(&self.running);
        let status = self.status.clone();
        let diagnostics = Arc::clone(&self.diagnostics);

        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();

        let handle = tokio::task::spawn_blocking(move || {
            // Opened on THIS thread: cpal streams are !Send.
            let source: Box<dyn SampleSource> = match open_source() {
                Ok(source) => {
                    let _ = open_tx.send(Ok(()));
                    source
                }
                Err(e) => {
                    running.store(false, Ordering::SeqCst);
                    let _ = open_tx.send(Err(e));
                    return;
                }
            };

            let raw_writer = config
                .store_raw_audio
                .then(|| RawAudioWriter::new(&config.raw_audio_dir));

            pipeline::run(pipeline::PipelineContext {
                config,
                window_samples,
                num_chunks,
                source,
                open_source,
                extractor,
                model,
                sink,
                raw_writer,
                running,
                status,
                diagnostics,
            });
        });
        *worker = Some(handle);
        drop(worker);

        match open_rx.recv() {
            Ok(Ok(())) => {
                info!("engine started, listening");
                Ok(())
            }
            Ok(Err(e)) => {
                // The task returns right after sending; nothing to wait for.
                self.worker.lock().take();
                self.running.store(false, Ordering::SeqCst);
                self.status.set(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Sender dropped without a message: the factory panicked.
                self.worker.lock().take();
                self.running.store(false, Ordering::SeqCst);
                self.status
                    .set(EngineStatus::Error, Some("pipeline failed to start".into()));
                Err(HarkError::Other(anyhow::anyhow!(
                    "pipeline task died unexpectedly"
                )))
            }
        }
    }

    /// Start on the configured cpal input device.
    #[cfg(feature = "audio-cpal")]
    pub fn start_default(&self) -> Result<()> {
        let sample_rate = self.config.sample_rate;
        let chunk_size = self.config.chunk_size;
        let device = self.config.input_device.clone();
        let timeout = self.config.read_timeout();
        self.start(Box::new(move || {
            let source =
                crate::audio::CpalSource::open(sample_rate, chunk_size, device.as_deref(), timeout)?;
            Ok(Box::new(source) as Box<dyn SampleSource>)
        }))
    }

    /// Request the pipeline to stop. It finishes the current cycle first.
    ///
    /// # Errors
    /// `NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(HarkError::NotRunning);
        }
        info!("engine stop requested");
        Ok(())
    }

    /// Wait for the pipeline thread to exit (after `stop()` or end of input).
    pub async fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("pipeline task ended abnormally: {e}");
            }
        }
    }

    /// Classify a single window without publishing it.
    ///
    /// # Errors
    /// `Config` if the window has the wrong length; inference errors as-is.
    pub fn classify_window(
        &self,
        window: &AudioWindow,
    ) -> Result<(ClassProbabilities, Option<Decision>)> {
        let features = self.extractor.extract(window)?;
        let probabilities = self.model.infer(&features)?;
        let decision = decide(
            &probabilities,
            self.config.confidence_threshold,
            &self.config.label_list,
        );
        Ok((probabilities, decision))
    }

    pub fn status(&self) -> EngineStatus {
        self.status.get()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status.subscribe()
    }

    /// Snapshot of pipeline counters.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn feature_shape(&self) -> FeatureShape {
        self.extractor.shape()
    }

    pub fn window_samples(&self) -> usize {
        self.window_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::audio::replay::ReplaySource;
    use crate::inference::StubClassifier;
    use crate::sink::BroadcastSink;

    fn stub(frames: usize, classes: usize) -> ModelHandle {
        ModelHandle::new(StubClassifier::uniform(
            FeatureShape {
                frames,
                coefficients: 10,
            },
            classes,
        ))
    }

    fn sink() -> Arc<dyn ResultSink> {
        Arc::new(BroadcastSink::default())
    }

    /// Endless silence, paced like a slow device.
    struct Silence;

    impl SampleSource for Silence {
        fn sample_rate(&self) -> u32 {
            44_100
        }
        fn chunk_size(&self) -> usize {
            4410
        }
        fn read(&mut self) -> Result<crate::buffering::chunk::SampleChunk> {
            std::thread::sleep(std::time::Duration::from_millis(2));
            Ok(crate::buffering::chunk::SampleChunk::new(vec![0; 4410], 44_100))
        }
        fn close(&mut self) {}
    }

    #[test]
    fn label_count_must_match_model() {
        let err = Engine::new(PipelineConfig::one_second(), stub(49, 5), sink())
            .err()
            .expect("label mismatch");
        assert!(err.is_config_error());
    }

    #[test]
    fn model_shape_must_match_features() {
        let err = Engine::new(PipelineConfig::one_second(), stub(98, 7), sink())
            .err()
            .expect("shape mismatch");
        assert!(matches!(err, HarkError::ModelShapeMismatch { .. }));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = PipelineConfig::one_second();
        config.features.frame_step = 1000;
        assert!(Engine::new(config, stub(49, 7), sink())
            .err()
            .expect("bad geometry")
            .is_config_error());
    }

    #[test]
    fn status_cell_broadcasts_changes_only() {
        let (tx, _) = broadcast::channel(8);
        let cell = StatusCell::new(tx);
        let mut rx = cell.subscribe();

        cell.set(EngineStatus::Listening, None);
        cell.set(EngineStatus::Listening, None);
        cell.set(EngineStatus::Recording, None);

        assert_eq!(rx.try_recv().unwrap().status, EngineStatus::Listening);
        assert_eq!(rx.try_recv().unwrap().status, EngineStatus::Recording);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_reports_open_failure_and_allows_retry() {
        let engine = Engine::new(PipelineConfig::one_second(), stub(49, 7), sink()).unwrap();

        let err = engine
            .start(Box::new(|| Err(HarkError::NoDefaultInputDevice)))
            .unwrap_err();
        assert!(err.is_device_error());
        assert!(!engine.is_running());
        assert_eq!(engine.status(), EngineStatus::Error);

        engine
            .start(Box::new(|| {
                Ok(Box::new(ReplaySource::from_samples(vec![0; 4410 * 3], 44_100, 4410))
                    as Box<dyn SampleSource>)
            }))
            .expect("second start");
        engine.join().await;
        assert!(!engine.is_running());
        assert_eq!(engine.status(), EngineStatus::Stopped);
        assert_eq!(engine.diagnostics_snapshot().chunks_read, 3);
        assert!(matches!(engine.stop(), Err(HarkError::NotRunning)));
    }

    /// Silence at a real-time-ish pace, counting reads.
    struct Paced {
        reads: Arc<AtomicUsize>,
    }

    impl SampleSource for Paced {
        fn sample_rate(&self) -> u32 {
            44_100
        }
        fn chunk_size(&self) -> usize {
            4410
        }
        fn read(&mut self) -> Result<crate::buffering::chunk::SampleChunk> {
            std::thread::sleep(std::time::Duration::from_millis(50));
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(crate::buffering::chunk::SampleChunk::new(vec![0; 4410], 44_100))
        }
        fn close(&mut self) {}
    }

    fn paced(reads: &Arc<AtomicUsize>) -> SourceFactory {
        let reads = Arc::clone(reads);
        Box::new(move || {
            Ok(Box::new(Paced {
                reads: Arc::clone(&reads),
            }) as Box<dyn SampleSource>)
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn restart_is_refused_until_previous_pipeline_exits() {
        let engine = Engine::new(PipelineConfig::one_second(), stub(49, 7), sink()).unwrap();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        engine.start(paced(&first)).expect("first start");
        engine.stop().expect("stop");
        assert!(matches!(
            engine.start(paced(&second)),
            Err(HarkError::AlreadyRunning)
        ));
        assert!(!engine.is_running());

        engine.join().await;
        let first_reads = first.load(Ordering::SeqCst);

        engine.start(paced(&second)).expect("restart after join");
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(first.load(Ordering::SeqCst), first_reads);
        assert!(second.load(Ordering::SeqCst) > 0);

        engine.stop().expect("stop again");
        engine.join().await;
        assert_eq!(engine.status(), EngineStatus::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn double_start_is_rejected() {
        let engine = Engine::new(PipelineConfig::one_second(), stub(49, 7), sink()).unwrap();
        // A source that never triggers keeps the pipeline alive until stop().
        engine
            .start(Box::new(|| Ok(Box::new(Silence) as Box<dyn SampleSource>)))
            .expect("start");

        assert!(matches!(
            engine.start(Box::new(|| Err(HarkError::NoDefaultInputDevice))),
            Err(HarkError::AlreadyRunning)
        ));
        engine.stop().expect("stop");
        engine.join().await;
        assert_eq!(engine.status(), EngineStatus::Stopped);
    }
}
