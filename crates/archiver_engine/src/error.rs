use crate::package::PackageError;
use crate::persist::PersistError;
use crate::schedule::ScheduleError;
use crate::target::TargetError;
use crate::{FetchError, JobId};

/// Whole-job failures. Per-unit failures never appear here; they are counted
/// in the summary and rendered as placeholders.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("another export (job {running}) is already running")]
    Busy { running: JobId },
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error("could not load {url}: {source}")]
    Seed {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("nothing to export: {0}")]
    NothingToExport(String),
    #[error("export cancelled")]
    Cancelled,
    #[error("scheduling failed: {0}")]
    Schedule(ScheduleError),
    #[error("packaging failed: {0}")]
    Package(#[from] PackageError),
    #[error("saving failed: {0}")]
    Save(#[from] PersistError),
}

impl From<ScheduleError> for ExportError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::Cancelled => ExportError::Cancelled,
            ScheduleError::NoUnits => ExportError::NothingToExport("no units found".to_string()),
            other => ExportError::Schedule(other),
        }
    }
}
