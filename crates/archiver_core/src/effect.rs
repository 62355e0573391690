use crate::{JobId, JobKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The request was accepted; the engine should run it under `job_id`.
    StartJob {
        job_id: JobId,
        kind: JobKind,
        target: String,
    },
    /// Another job is still running; the request was dropped.
    RejectBusy { running: JobId },
}
