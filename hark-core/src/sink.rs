//! Result sinks: where accepted decisions go.
//!
//! `publish` is fire-and-forget. Sinks never block the pipeline thread for
//! longer than a channel send; slow consumers lose messages instead.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, TrySendError};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::decision::Decision;
use crate::error::{HarkError, Result};
use crate::events::DecisionEnvelope;

/// Pending envelopes per `JsonLinesSink` before new ones are dropped.
pub const JSONL_QUEUE_CAPACITY: usize = 64;

/// Destination for accepted decisions.
pub trait ResultSink: Send + Sync {
    /// # Errors
    /// `Publish` if the decision could not be handed off. Callers log and
    /// move on; there is no retry.
    fn publish(&self, topic: &str, decision: &Decision) -> Result<()>;
}

/// Fans decisions out to in-process subscribers over a tokio broadcast channel.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<DecisionEnvelope>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DecisionEnvelope> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(32)
    }
}

impl ResultSink for BroadcastSink {
    fn publish(&self, topic: &str, decision: &Decision) -> Result<()> {
        let envelope = DecisionEnvelope {
            topic: topic.to_string(),
            payload: decision.clone(),
        };
        // No subscribers is not an error for a fire-and-forget sink.
        if self.tx.send(envelope).is_err() {
            debug!(topic, "decision broadcast with no subscribers");
        }
        Ok(())
    }
}

/// Writes one JSON envelope per line from a background thread.
pub struct JsonLinesSink {
    tx: Option<Sender<DecisionEnvelope>>,
    worker: Option<JoinHandle<()>>,
}

impl JsonLinesSink {
    pub fn stdout() -> Result<Self> {
        Self::from_writer(Box::new(io::stdout()))
    }

    /// Append to `path`, creating it if needed.
    pub fn append_to(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Self::from_writer(Box::new(BufWriter::new(file)))
    }

    pub fn from_writer(writer: Box<dyn Write + Send>) -> Result<Self> {
        Self::with_capacity(writer, JSONL_QUEUE_CAPACITY)
    }

    pub fn with_capacity(mut writer: Box<dyn Write + Send>, capacity: usize) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded::<DecisionEnvelope>(capacity);
        let worker = thread::Builder::new()
            .name("hark-jsonl".into())
            .spawn(move || {
                for envelope in rx {
                    let written = serde_json::to_writer(&mut writer, &envelope)
                        .map_err(io::Error::from)
                        .and_then(|_| writer.write_all(b"\n"))
                        .and_then(|_| writer.flush());
                    if let Err(e) = written {
                        warn!("failed to write decision line: {e}");
                    }
                }
            })?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }
}

impl ResultSink for JsonLinesSink {
    fn publish(&self, topic: &str, decision: &Decision) -> Result<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(HarkError::Publish("sink is closed".into()));
        };
        let envelope = DecisionEnvelope {
            topic: topic.to_string(),
            payload: decision.clone(),
        };
        match tx.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(HarkError::Publish(
                "output queue full; decision dropped".into(),
            )),
            Err(TrySendError::Disconnected(_)) => {
                Err(HarkError::Publish("output writer has exited".into()))
            }
        }
    }
}

impl Drop for JsonLinesSink {
    /// Flushes queued lines before returning.
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
