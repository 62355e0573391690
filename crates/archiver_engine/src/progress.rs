use std::sync::mpsc;

use engine_logging::{engine_info, engine_warn};

use crate::{ExportEvent, JobId, Stage};

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ExportEvent);
}

/// Forwards events into a channel; the receiver is the caller's event stream.
pub struct ChannelProgressSink {
    tx: mpsc::Sender<ExportEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: mpsc::Sender<ExportEvent>) -> Self {
        Self { tx }
    }

    pub fn pair() -> (Self, mpsc::Receiver<ExportEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: ExportEvent) {
        let _ = self.tx.send(event);
    }
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn emit(&self, event: ExportEvent) {
        match event {
            ExportEvent::Status { stage, message, .. } => {
                engine_info!("{}: {}", stage, message);
            }
            ExportEvent::JobCompleted { job_id, result } => match result {
                Ok(summary) => engine_info!(
                    "Job {} finished: {} ({} fetched, {} failed)",
                    job_id,
                    summary.filename,
                    summary.success_count,
                    summary.permanent_failure_count
                ),
                Err(reason) => engine_warn!("Job {} failed: {}", job_id, reason),
            },
        }
    }
}

/// Ties status events to one job so components only supply stage and text.
#[derive(Clone, Copy)]
pub struct StatusReporter<'a> {
    job_id: JobId,
    sink: &'a dyn ProgressSink,
}

impl<'a> StatusReporter<'a> {
    pub fn new(job_id: JobId, sink: &'a dyn ProgressSink) -> Self {
        Self { job_id, sink }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn status(&self, stage: Stage, message: impl Into<String>) {
        self.sink.emit(ExportEvent::Status {
            job_id: self.job_id,
            stage,
            message: message.into(),
        });
    }
}
