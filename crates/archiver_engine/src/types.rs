use std::fmt;
use std::path::PathBuf;

pub use archiver_core::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Queued,
    Listing,
    Fetching { pass: u8 },
    Cooldown,
    Sanitizing,
    Packaging,
    Saving,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Queued => write!(f, "queued"),
            Stage::Listing => write!(f, "listing"),
            Stage::Fetching { pass } => write!(f, "fetching (pass {pass})"),
            Stage::Cooldown => write!(f, "cooldown"),
            Stage::Sanitizing => write!(f, "sanitizing"),
            Stage::Packaging => write!(f, "packaging"),
            Stage::Saving => write!(f, "saving"),
            Stage::Done => write!(f, "done"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportEvent {
    /// Human-readable status, emitted before every attempt, delay and phase change.
    Status {
        job_id: JobId,
        stage: Stage,
        message: String,
    },
    JobCompleted {
        job_id: JobId,
        result: Result<ExportSummary, String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    Pending,
    Fetched,
    Failed,
}

/// One fetchable piece of the source document: a chapter or a standalone document.
///
/// `sequence` is assigned once, 1-based and contiguous in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentUnit {
    pub sequence: u32,
    /// Remote key used to build the fetch request (chapter number or document id).
    pub key: String,
    pub label: String,
    pub raw_content: Option<String>,
    pub status: UnitStatus,
}

impl ContentUnit {
    pub fn new(sequence: u32, key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            sequence,
            key: key.into(),
            label: label.into(),
            raw_content: None,
            status: UnitStatus::Pending,
        }
    }

    /// Builds `1..=N` units from `(key, label)` pairs in source order.
    pub fn numbered<I, K, L>(items: I) -> Vec<ContentUnit>
    where
        I: IntoIterator<Item = (K, L)>,
        K: Into<String>,
        L: Into<String>,
    {
        items
            .into_iter()
            .zip(1u32..)
            .map(|((key, label), sequence)| ContentUnit::new(sequence, key, label))
            .collect()
    }

    pub fn is_fetched(&self) -> bool {
        self.status == UnitStatus::Fetched
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutput {
    pub bytes: Vec<u8>,
    pub metadata: FetchMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchMetadata {
    pub original_url: String,
    pub final_url: String,
    pub redirect_count: usize,
    pub content_type: Option<String>,
    pub byte_len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    RedirectLimitExceeded,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    UnsupportedContentType { content_type: String },
    EmptyContent,
    ExtractionFailed,
    Decode,
    Cancelled,
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::UnsupportedContentType { content_type } => {
                write!(f, "unsupported content type {content_type}")
            }
            FailureKind::EmptyContent => write!(f, "empty content"),
            FailureKind::ExtractionFailed => write!(f, "content region not found"),
            FailureKind::Decode => write!(f, "decode error"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

/// Outcome of a finished export job, as reported to callers and events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub filename: String,
    pub saved_to: Option<PathBuf>,
    pub byte_len: u64,
    pub total_units: usize,
    pub success_count: usize,
    pub permanent_failure_count: usize,
}
