//! `hark` command-line host.
//!
//! Loads settings, builds the classifier, and runs the engine until the
//! input ends or Ctrl-C. Accepted decisions are written as JSON lines.

mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hark_core::{
    audio::{device::list_input_devices, replay::read_wav_mono16},
    AudioWindow, BroadcastSink, Engine, EngineStatus, FeatureExtractor, JsonLinesSink,
    ModelHandle, OnnxClassifier, PipelineConfig, ReplaySource, ResultSink, SampleSource,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use settings::{load_config, Overrides};

#[derive(Parser)]
#[command(name = "hark")]
#[command(about = "Listen for loud sounds and classify them", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to the per-user config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Base preset the settings file is laid over: one-second or two-second
    #[arg(short, long, global = true)]
    preset: Option<String>,

    /// Verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trigger, capture and classify loop
    Listen {
        /// Replay a mono 16-bit WAV file instead of opening a microphone
        #[arg(long)]
        replay: Option<PathBuf>,

        /// ONNX model path
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Input device name
        #[arg(short, long)]
        device: Option<String>,

        /// Minimum confidence for a decision to be published
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Append decisions to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Save each captured window as a WAV file
        #[arg(long)]
        store_raw_audio: bool,
    },

    /// Classify the first window of a WAV file and print the decision
    Classify {
        /// Mono 16-bit WAV file
        input: PathBuf,

        #[arg(short, long)]
        model: Option<PathBuf>,

        #[arg(short, long)]
        threshold: Option<f32>,
    },

    /// List audio input devices
    Devices,

    /// Print the effective configuration as JSON
    PrintConfig,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "hark_core=info,hark_app=info",
        1 => "hark_core=debug,hark_app=debug",
        _ => "hark_core=trace,hark_app=trace",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = load_config(cli.config.as_deref(), cli.preset.as_deref())?;

    match cli.command {
        Commands::Listen {
            replay,
            model,
            device,
            threshold,
            output,
            store_raw_audio,
        } => {
            Overrides {
                model,
                device,
                threshold,
                store_raw_audio,
            }
            .apply(&mut config);
            listen(config, replay, output).await
        }
        Commands::Classify {
            input,
            model,
            threshold,
        } => {
            Overrides {
                model,
                threshold,
                ..Overrides::default()
            }
            .apply(&mut config);
            classify(config, &input)
        }
        Commands::Devices => {
            let devices = list_input_devices(config.sample_rate);
            if devices.is_empty() {
                println!("no input devices found");
            }
            for d in devices {
                let marker = if d.is_default { "*" } else { " " };
                let rate = if d.supports_rate { "" } else { " (resampled)" };
                println!("{marker} {}{rate}", d.name);
            }
            Ok(())
        }
        Commands::PrintConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load_model(config: &PipelineConfig) -> Result<ModelHandle> {
    config.validate()?;
    let extractor =
        FeatureExtractor::new(config.sample_rate, config.window_samples()?, &config.features)?;
    let classifier = OnnxClassifier::load(&config.model_path, extractor.shape())
        .with_context(|| format!("loading model {}", config.model_path.display()))?;
    Ok(ModelHandle::new(classifier))
}

async fn listen(
    config: PipelineConfig,
    replay: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let model = load_model(&config)?;
    let sink: Arc<dyn ResultSink> = match &output {
        Some(path) => Arc::new(
            JsonLinesSink::append_to(path)
                .with_context(|| format!("opening output file {}", path.display()))?,
        ),
        None => Arc::new(JsonLinesSink::stdout()?),
    };

    let engine = Engine::new(config, model, sink)?;
    engine.warm_up()?;

    let mut status_rx = engine.subscribe_status();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => match &event.detail {
                    Some(detail) => info!(status = ?event.status, %detail, "engine status"),
                    None => debug!(status = ?event.status, "engine status"),
                },
                Err(RecvError::Lagged(n)) => warn!(missed = n, "status events lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    match replay {
        Some(path) => {
            let sample_rate = engine.config().sample_rate;
            let chunk_size = engine.config().chunk_size;
            engine.start(Box::new(move || {
                let source = ReplaySource::from_wav(&path, sample_rate, chunk_size)?;
                Ok(Box::new(source) as Box<dyn SampleSource>)
            }))?;
        }
        None => engine.start_default()?,
    }

    let finished = engine.join();
    tokio::pin!(finished);
    tokio::select! {
        _ = &mut finished => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for Ctrl-C")?;
            info!("interrupted; finishing current cycle");
            let _ = engine.stop();
            finished.await;
        }
    }

    let diagnostics = engine.diagnostics_snapshot();
    info!(
        triggers = diagnostics.triggers,
        published = diagnostics.decisions_published,
        below_threshold = diagnostics.decisions_below_threshold,
        errors = diagnostics.cycle_errors,
        "session finished"
    );
    if engine.status() == EngineStatus::Error {
        bail!("pipeline stopped on an unrecoverable error");
    }
    Ok(())
}

fn classify(config: PipelineConfig, input: &Path) -> Result<()> {
    let (samples, rate) =
        read_wav_mono16(input).with_context(|| format!("reading {}", input.display()))?;
    if rate != config.sample_rate {
        bail!(
            "{} is recorded at {rate} Hz, configuration expects {} Hz",
            input.display(),
            config.sample_rate
        );
    }

    let model = load_model(&config)?;
    let engine = Engine::new(config, model, Arc::new(BroadcastSink::default()))?;
    let needed = engine.window_samples();
    if samples.len() < needed {
        bail!(
            "{} has {} samples, one window needs {needed}",
            input.display(),
            samples.len()
        );
    }

    let window = AudioWindow::from_samples(samples[..needed].to_vec(), rate);
    let (probabilities, decision) = engine.classify_window(&window)?;
    debug!(probabilities = ?probabilities.as_slice(), "classified");
    match decision {
        Some(decision) => println!("{}", serde_json::to_string(&decision)?),
        None => println!("no decision"),
    }
    Ok(())
}
