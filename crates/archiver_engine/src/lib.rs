//! Archiver engine: fetching, scheduling, sanitizing and packaging of export jobs.
mod archive;
mod config;
mod convert;
mod cover;
mod decode;
mod error;
mod fetch;
mod filename;
mod frontmatter;
mod locate;
mod metadata;
mod orchestrator;
mod package;
mod persist;
mod progress;
mod sanitize;
mod schedule;
mod target;
mod types;

pub use archive::{archive_entry_name, build_flat_archive, failure_notice, ERROR_SUFFIX};
pub use config::{
    ConfigError, CoverConfig, EngineConfig, FetchConfig, ScheduleSettings, SiteConfig,
};
pub use convert::{Converter, Html2MdConverter};
pub use cover::{cover_art, cover_candidates, probe_cover, DEFAULT_RESOLUTION_TOKENS};
pub use decode::{decode_fetched, decode_html, DecodeError, DecodedHtml};
pub use error::ExportError;
pub use fetch::{FetchSettings, Fetcher, ReqwestFetcher};
pub use filename::{archive_filename, entry_filename, package_filename, sanitize_filename};
pub use frontmatter::build_markdown_document;
pub use locate::{ContentLocator, Located, LocatorError, LocatorKey, SelectorLocator};
pub use metadata::{
    classify_segment, normalize_metadata, CoverArt, MetadataField, SegmentRule, StoryMetadata,
    StoryStatus, SEGMENT_RULES,
};
pub use orchestrator::{Clock, DocumentRef, ExportOrchestrator};
pub use package::{
    build_epub, chapter_filename, package_plan, ItemRole, Package, PackageError, PackageItem,
    PLACEHOLDER_TEXT,
};
pub use persist::{ensure_output_dir, AtomicFileWriter, DirectorySink, PersistError, SaveSink};
pub use progress::{ChannelProgressSink, LogProgressSink, ProgressSink, StatusReporter};
pub use sanitize::{escape_attr, escape_xml, sanitize_fragment};
pub use schedule::{
    DelayPolicy, FetchScheduler, ScheduleConfig, ScheduleError, ScheduleReport, UnitFetch,
    UnitOutcome,
};
pub use target::{document_url, resolve_reference, StoryTarget, TargetError};
pub use types::{
    ContentUnit, ExportEvent, ExportSummary, FailureKind, FetchError, FetchMetadata, FetchOutput,
    JobId, Stage, UnitStatus,
};
