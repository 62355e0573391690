use crate::{JobId, JobPhase, JobResultKind};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportViewModel {
    pub phase: JobPhase,
    pub job_id: Option<JobId>,
    pub status_line: Option<String>,
    pub last_result: Option<JobResultKind>,
    pub dirty: bool,
}

impl ExportViewModel {
    pub fn is_busy(&self) -> bool {
        self.phase == JobPhase::Running
    }
}
