#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// User asked for a new export.
    StartRequested {
        kind: crate::JobKind,
        target: String,
    },
    /// Engine status line for a running job.
    Status {
        job_id: crate::JobId,
        message: String,
    },
    /// Engine completion for a job.
    JobDone {
        job_id: crate::JobId,
        result: crate::JobResultKind,
    },
    /// Fallback for placeholder wiring.
    NoOp,
}
