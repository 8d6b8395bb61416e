use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::PROGRESS_STEP_PERCENT;
use crate::model::{JobUpdate, OcrStatus};

pub trait ResultSink: Send + Sync {
    fn publish(&self, job_id: &str, update: &JobUpdate) -> Result<()>;
}

type QueuedUpdate = (String, JobUpdate);

/// Hands updates to a writer on the blocking pool so publishing never waits
/// on storage. Updates reach the inner sink in publish order; the writer
/// finishes once every handle to the queue has been dropped.
pub struct QueuedSink {
    sender: mpsc::UnboundedSender<QueuedUpdate>,
}

impl QueuedSink {
    pub fn spawn(inner: Arc<dyn ResultSink>) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<QueuedUpdate>();
        let writer = tokio::task::spawn_blocking(move || {
            while let Some((job_id, update)) = receiver.blocking_recv() {
                if let Err(err) = inner.publish(&job_id, &update) {
                    warn!(
                        job_id = %job_id,
                        status = %update.status,
                        progress = update.progress,
                        error = %err,
                        "failed to persist job update"
                    );
                }
            }
        });
        (Self { sender }, writer)
    }
}

impl ResultSink for QueuedSink {
    fn publish(&self, job_id: &str, update: &JobUpdate) -> Result<()> {
        self.sender
            .send((job_id.to_string(), update.clone()))
            .map_err(|_| anyhow!("job update writer has stopped"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn fraction_to_percent(fraction: f64) -> u8 {
    if fraction.is_nan() {
        return 0;
    }
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u8
}

pub struct ProgressReporter<'a> {
    sink: &'a dyn ResultSink,
    job_id: &'a str,
    last_sent: Option<u8>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sink: &'a dyn ResultSink, job_id: &'a str) -> Self {
        Self {
            sink,
            job_id,
            last_sent: None,
        }
    }

    pub fn last_sent(&self) -> Option<u8> {
        self.last_sent
    }

    pub fn report(&mut self, fraction: f64) {
        let percent = fraction_to_percent(fraction);
        let due = match self.last_sent {
            None => true,
            Some(last) if percent <= last => false,
            Some(last) => percent - last >= PROGRESS_STEP_PERCENT || percent == 100,
        };
        if due {
            self.publish(&JobUpdate::progress(OcrStatus::Processing, percent));
        }
    }

    pub fn publish(&mut self, update: &JobUpdate) {
        self.last_sent = Some(update.progress);
        if let Err(err) = self.sink.publish(self.job_id, update) {
            warn!(
                job_id = self.job_id,
                status = %update.status,
                progress = update.progress,
                error = %err,
                "failed to publish job update"
            );
        }
    }
}
