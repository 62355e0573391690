//! Archiver core: pure export job state machine and view-model helpers.
mod effect;
mod msg;
mod state;
mod update;
mod view_model;

pub use effect::Effect;
pub use msg::Msg;
pub use state::{ActiveJob, CompletedJob, ExportState, JobId, JobKind, JobPhase, JobResultKind};
pub use update::update;
pub use view_model::ExportViewModel;
