use crate::{Effect, ExportState, JobPhase, Msg};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: ExportState, msg: Msg) -> (ExportState, Vec<Effect>) {
    let effects = match msg {
        Msg::StartRequested { kind, target } => {
            // Overlapping starts are rejected, never queued.
            if state.phase() == JobPhase::Running {
                let running = state.active().map(|job| job.job_id).unwrap_or_default();
                vec![Effect::RejectBusy { running }]
            } else {
                let job_id = state.start_job(kind, target.clone());
                vec![Effect::StartJob {
                    job_id,
                    kind,
                    target,
                }]
            }
        }
        Msg::Status { job_id, message } => {
            state.apply_status(job_id, message);
            Vec::new()
        }
        Msg::JobDone { job_id, result } => {
            state.apply_done(job_id, result);
            Vec::new()
        }
        Msg::NoOp => Vec::new(),
    };

    (state, effects)
}
