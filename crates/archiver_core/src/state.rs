use crate::view_model::ExportViewModel;

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Multi-chapter story packaged as an e-book.
    Story,
    /// One standalone document saved as text.
    Document,
    /// Independent documents bundled into a flat archive.
    DocumentBatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobPhase {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResultKind {
    Success { fetched: usize, failed: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveJob {
    pub job_id: JobId,
    pub kind: JobKind,
    pub target: String,
    pub status_line: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedJob {
    pub job_id: JobId,
    pub kind: JobKind,
    pub target: String,
    pub result: JobResultKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportState {
    phase: JobPhase,
    next_job_id: JobId,
    active: Option<ActiveJob>,
    last: Option<CompletedJob>,
    dirty: bool,
}

impl Default for ExportState {
    fn default() -> Self {
        Self {
            phase: JobPhase::Idle,
            next_job_id: 1,
            active: None,
            last: None,
            dirty: false,
        }
    }
}

impl ExportState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn active(&self) -> Option<&ActiveJob> {
        self.active.as_ref()
    }

    pub fn last_completed(&self) -> Option<&CompletedJob> {
        self.last.as_ref()
    }

    pub fn view(&self) -> ExportViewModel {
        ExportViewModel {
            phase: self.phase,
            job_id: self.active.as_ref().map(|job| job.job_id),
            status_line: self
                .active
                .as_ref()
                .and_then(|job| job.status_line.clone()),
            last_result: self.last.as_ref().map(|job| job.result.clone()),
            dirty: self.dirty,
        }
    }

    /// Returns whether the view changed since the last call and resets the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn start_job(&mut self, kind: JobKind, target: String) -> JobId {
        let job_id = self.next_job_id;
        self.next_job_id += 1;
        self.phase = JobPhase::Running;
        self.active = Some(ActiveJob {
            job_id,
            kind,
            target,
            status_line: None,
        });
        self.dirty = true;
        job_id
    }

    pub(crate) fn apply_status(&mut self, job_id: JobId, message: String) {
        if let Some(job) = self.active.as_mut().filter(|job| job.job_id == job_id) {
            job.status_line = Some(message);
            self.dirty = true;
        }
    }

    pub(crate) fn apply_done(&mut self, job_id: JobId, result: JobResultKind) {
        let Some(job) = self.active.take_if(|job| job.job_id == job_id) else {
            return;
        };
        self.phase = match result {
            JobResultKind::Success { .. } => JobPhase::Succeeded,
            JobResultKind::Failed { .. } => JobPhase::Failed,
        };
        self.last = Some(CompletedJob {
            job_id,
            kind: job.kind,
            target: job.target,
            result,
        });
        self.dirty = true;
    }
}
