use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use archiver_core::{update, Effect, ExportState, ExportViewModel, JobKind, JobResultKind, Msg};
use chrono::{DateTime, FixedOffset, Local, Utc};
use engine_logging::{engine_info, engine_warn, with_job_context};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::archive::build_flat_archive;
use crate::config::{EngineConfig, SiteConfig};
use crate::convert::{Converter, Html2MdConverter};
use crate::cover::probe_cover;
use crate::decode::decode_fetched;
use crate::error::ExportError;
use crate::fetch::{Fetcher, ReqwestFetcher};
use crate::filename::{archive_filename, package_filename};
use crate::frontmatter::build_markdown_document;
use crate::locate::{ContentLocator, LocatorKey, SelectorLocator};
use crate::metadata::{normalize_metadata, StoryMetadata};
use crate::package::{build_epub, Package};
use crate::persist::SaveSink;
use crate::progress::{LogProgressSink, ProgressSink, StatusReporter};
use crate::sanitize::sanitize_fragment;
use crate::schedule::{FetchScheduler, ScheduleConfig, UnitFetch};
use crate::target::{document_url, resolve_reference, StoryTarget};
use crate::{
    ContentUnit, ExportEvent, ExportSummary, FailureKind, FetchError, JobId, Stage,
};

/// Wall-clock source. Archive names use the local time it carries; front matter
/// stamps are converted to UTC.
pub type Clock = Arc<dyn Fn() -> DateTime<FixedOffset> + Send + Sync>;

/// A private document to include in a bulk export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: String,
    pub label: String,
}

/// Runs export jobs one at a time. A start request while a job is running is
/// rejected with [`ExportError::Busy`].
///
/// Each job gets its own cancellation token, a child of the shutdown token
/// given to [`ExportOrchestrator::with_cancellation`].
pub struct ExportOrchestrator {
    config: EngineConfig,
    pages: Arc<dyn Fetcher>,
    images: Arc<dyn Fetcher>,
    locator: Arc<dyn ContentLocator>,
    converter: Arc<dyn Converter>,
    sink: Arc<dyn SaveSink>,
    progress: Arc<dyn ProgressSink>,
    shutdown: CancellationToken,
    next_cancel: Mutex<CancellationToken>,
    clock: Clock,
    state: Mutex<ExportState>,
}

impl ExportOrchestrator {
    pub fn new(config: EngineConfig, sink: Arc<dyn SaveSink>) -> Self {
        let page_settings = config.fetch.settings();
        let image_settings = page_settings.for_images();
        Self {
            config,
            pages: Arc::new(ReqwestFetcher::new(page_settings)),
            images: Arc::new(ReqwestFetcher::new(image_settings)),
            locator: Arc::new(SelectorLocator::new()),
            converter: Arc::new(Html2MdConverter),
            sink,
            progress: Arc::new(LogProgressSink),
            shutdown: CancellationToken::new(),
            next_cancel: Mutex::new(CancellationToken::new()),
            clock: Arc::new(|| Local::now().fixed_offset()),
            state: Mutex::new(ExportState::new()),
        }
    }

    pub fn with_fetchers(mut self, pages: Arc<dyn Fetcher>, images: Arc<dyn Fetcher>) -> Self {
        self.pages = pages;
        self.images = images;
        self
    }

    pub fn with_locator(mut self, locator: Arc<dyn ContentLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Cancelling `shutdown` stops the running job and every later one.
    pub fn with_cancellation(mut self, shutdown: CancellationToken) -> Self {
        self.next_cancel = Mutex::new(shutdown.child_token());
        self.shutdown = shutdown;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Token of the running job, or of the next job to start while idle.
    /// A fresh token replaces it once that job ends.
    pub fn cancellation(&self) -> CancellationToken {
        self.lock_next_cancel().clone()
    }

    pub fn view(&self) -> ExportViewModel {
        self.lock_state().view()
    }

    /// Multi-chapter story packaged as an e-book.
    pub async fn export_story(&self, target: &str) -> Result<ExportSummary, ExportError> {
        let job = self.begin(JobKind::Story, target)?;
        with_job_context(job.id, async move {
            let result = self.story_job(&job, target).await;
            job.finish(result)
        })
        .await
    }

    /// One document saved as Markdown.
    pub async fn export_document(
        &self,
        doc_id: &str,
        title: Option<&str>,
    ) -> Result<ExportSummary, ExportError> {
        let job = self.begin(JobKind::Document, doc_id)?;
        with_job_context(job.id, async move {
            let result = self.document_job(&job, doc_id, title).await;
            job.finish(result)
        })
        .await
    }

    /// Independent documents bundled into a flat archive. An empty list exports
    /// every document on the configured listing page.
    pub async fn export_documents(
        &self,
        documents: Vec<DocumentRef>,
    ) -> Result<ExportSummary, ExportError> {
        let job = self.begin(JobKind::DocumentBatch, &describe_batch(&documents))?;
        with_job_context(job.id, async move {
            let result = self.document_batch_job(&job, documents).await;
            job.finish(result)
        })
        .await
    }

    async fn story_job(
        &self,
        job: &ActiveJob<'_>,
        input: &str,
    ) -> Result<ExportSummary, ExportError> {
        let tracked = TrackedSink::new(&self.state, self.progress.as_ref());
        let reporter = StatusReporter::new(job.id, &tracked);

        let target = StoryTarget::parse(input, &self.config.site)?;
        reporter.status(Stage::Listing, format!("Loading story {}", target.id));
        let seed = self.load_seed(&target.canonical_url, &job.cancel).await?;

        let units = self.chapter_units(&seed);
        engine_info!("Story {} has {} chapters", target.id, units.len());
        let meta = self.story_metadata(&seed, &target, reporter, &job.cancel).await?;

        let fetch = ChapterFetch {
            pages: self.pages.as_ref(),
            locator: self.locator.as_ref(),
            target: &target,
        };
        let report = self
            .scheduler(self.config.chapters.schedule(), &job.cancel)
            .run(units, &fetch, reporter)
            .await?;

        reporter.status(Stage::Sanitizing, "Sanitizing chapter markup");
        let units: Vec<ContentUnit> = report.units.into_iter().map(sanitize_unit).collect();

        reporter.status(
            Stage::Packaging,
            format!("Packaging {} chapters", units.len()),
        );
        let package = build_epub(&meta, &units)?;
        self.deliver(
            package,
            reporter,
            &job.cancel,
            units.len(),
            report.success_count,
            report.permanent_failure_count,
        )
    }

    async fn document_job(
        &self,
        job: &ActiveJob<'_>,
        doc_id: &str,
        title: Option<&str>,
    ) -> Result<ExportSummary, ExportError> {
        let tracked = TrackedSink::new(&self.state, self.progress.as_ref());
        let reporter = StatusReporter::new(job.id, &tracked);

        let doc_id = doc_id.trim();
        let label = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Document {doc_id}"));
        let source_url = document_url(&self.config.site, &self.config.site.document_path, doc_id)?;

        let fetch = DocumentFetch {
            pages: self.pages.as_ref(),
            locator: self.locator.as_ref(),
            site: &self.config.site,
        };
        let report = self
            .scheduler(self.config.documents.schedule(), &job.cancel)
            .run(vec![ContentUnit::new(1, doc_id, label.clone())], &fetch, reporter)
            .await?;

        let Some(markup) = report
            .units
            .into_iter()
            .find(ContentUnit::is_fetched)
            .and_then(|unit| unit.raw_content)
        else {
            return Err(ExportError::NothingToExport(format!(
                "document {doc_id} could not be retrieved after repeated attempts"
            )));
        };

        reporter.status(Stage::Packaging, "Converting to Markdown");
        let markdown = self.converter.to_markdown(&sanitize_fragment(&markup));
        let fetched_utc = (self.clock)().with_timezone(&Utc).to_rfc3339();
        let document = build_markdown_document(&label, &source_url, &fetched_utc, &markdown);
        let package = Package {
            filename: package_filename(&label, "md"),
            bytes: document.into_bytes(),
        };
        self.deliver(package, reporter, &job.cancel, 1, 1, 0)
    }

    async fn document_batch_job(
        &self,
        job: &ActiveJob<'_>,
        documents: Vec<DocumentRef>,
    ) -> Result<ExportSummary, ExportError> {
        let tracked = TrackedSink::new(&self.state, self.progress.as_ref());
        let reporter = StatusReporter::new(job.id, &tracked);

        let documents = if documents.is_empty() {
            reporter.status(Stage::Listing, "Listing documents");
            self.list_documents(&job.cancel).await?
        } else {
            dedupe_documents(documents)
        };
        if documents.is_empty() {
            return Err(ExportError::NothingToExport("no documents found".to_string()));
        }

        let units = ContentUnit::numbered(documents.into_iter().map(|doc| (doc.id, doc.label)));
        let fetch = DocumentFetch {
            pages: self.pages.as_ref(),
            locator: self.locator.as_ref(),
            site: &self.config.site,
        };
        let report = self
            .scheduler(self.config.documents.schedule(), &job.cancel)
            .run(units, &fetch, reporter)
            .await?;

        reporter.status(Stage::Packaging, "Converting documents to Markdown");
        let now = (self.clock)();
        let fetched_utc = now.with_timezone(&Utc).to_rfc3339();
        let units: Vec<ContentUnit> = report
            .units
            .into_iter()
            .map(|mut unit| {
                if let Some(markup) = unit.raw_content.take() {
                    let markdown = self.converter.to_markdown(&sanitize_fragment(&markup));
                    let source_url = document_url(
                        &self.config.site,
                        &self.config.site.document_path,
                        &unit.key,
                    )
                    .unwrap_or_default();
                    unit.raw_content = Some(build_markdown_document(
                        &unit.label,
                        &source_url,
                        &fetched_utc,
                        &markdown,
                    ));
                }
                unit
            })
            .collect();

        let package = build_flat_archive(
            archive_filename(&self.config.archive_prefix, &now),
            &units,
            ".md",
        )?;
        self.deliver(
            package,
            reporter,
            &job.cancel,
            units.len(),
            report.success_count,
            report.permanent_failure_count,
        )
    }

    fn scheduler(&self, config: ScheduleConfig, cancel: &CancellationToken) -> FetchScheduler {
        FetchScheduler::new(config).with_cancellation(cancel.clone())
    }

    async fn load_seed(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ExportError> {
        check_cancelled(cancel)?;
        self.fetch_page(url).await.map_err(|source| ExportError::Seed {
            url: url.to_string(),
            source,
        })
    }

    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let output = self.pages.fetch(url).await?;
        decode_fetched(&output)
    }

    /// Chapter list from the seed page, deduplicated by option value. A story
    /// without a chapter selector has exactly one chapter.
    fn chapter_units(&self, html: &str) -> Vec<ContentUnit> {
        let mut seen = HashSet::new();
        let chapters: Vec<(String, String)> = self
            .locator
            .locate_all(html, LocatorKey::ChapterList)
            .into_iter()
            .filter_map(|option| {
                let key = option.attr("value")?.trim().to_string();
                if key.is_empty() || !seen.insert(key.clone()) {
                    return None;
                }
                let label = if option.text.is_empty() {
                    format!("Chapter {key}")
                } else {
                    option.text.clone()
                };
                Some((key, label))
            })
            .collect();

        if chapters.is_empty() {
            return vec![ContentUnit::new(1, "1", "Chapter 1")];
        }
        ContentUnit::numbered(chapters)
    }

    async fn story_metadata(
        &self,
        html: &str,
        target: &StoryTarget,
        reporter: StatusReporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<StoryMetadata, ExportError> {
        let locator = self.locator.as_ref();
        let line = locator
            .locate(html, LocatorKey::MetadataLine)
            .map(|found| found.text)
            .unwrap_or_default();
        let timestamps: Vec<i64> = locator
            .locate_all(html, LocatorKey::Timestamps)
            .iter()
            .filter_map(|found| found.attr("data-xutime")?.trim().parse().ok())
            .collect();

        let mut meta = normalize_metadata(&line, &timestamps);
        meta.id = target.id.clone();
        meta.canonical_url = target.canonical_url.clone();
        meta.title = locator
            .locate(html, LocatorKey::Title)
            .map(|found| found.text)
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| format!("Story {}", target.id));
        if let Some(author) = locator.locate(html, LocatorKey::Author) {
            meta.author_url = author
                .attr("href")
                .and_then(|href| resolve_reference(target.origin(), href));
            meta.author = author.text;
        }
        if meta.author.is_empty() {
            meta.author = "Unknown author".to_string();
        }
        meta.description = locator
            .locate(html, LocatorKey::Description)
            .map(|found| found.text)
            .unwrap_or_default();
        meta.source_label = locator
            .locate_all(html, LocatorKey::SourceLabel)
            .pop()
            .map(|found| found.text)
            .unwrap_or_default();

        if self.config.cover.enabled {
            let cover_url = locator
                .locate(html, LocatorKey::CoverImage)
                .and_then(|img| img.attr("src").and_then(|src| resolve_reference(target.origin(), src)));
            if let Some(url) = cover_url {
                check_cancelled(cancel)?;
                reporter.status(Stage::Listing, "Resolving cover art");
                meta.cover = probe_cover(
                    self.images.as_ref(),
                    &url,
                    &self.config.cover.resolution_tokens,
                )
                .await;
                if meta.cover.is_none() {
                    engine_warn!("No cover could be fetched from {}", url);
                }
            }
        }
        Ok(meta)
    }

    async fn list_documents(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<DocumentRef>, ExportError> {
        let url = document_url(
            &self.config.site,
            &self.config.site.document_list_path,
            "",
        )?;
        let html = self.load_seed(&url, cancel).await?;
        let base = Url::parse(&url).ok();
        let documents = self
            .locator
            .locate_all(&html, LocatorKey::DocumentList)
            .into_iter()
            .filter_map(|link| {
                let href = link.attr("href")?;
                let resolved = match &base {
                    Some(base) => base.join(href).ok()?,
                    None => Url::parse(href).ok()?,
                };
                let id = resolved
                    .query_pairs()
                    .find(|(key, _)| key == "docid")
                    .map(|(_, value)| value.into_owned())?;
                let label = if link.text.is_empty() {
                    format!("Document {id}")
                } else {
                    link.text.clone()
                };
                Some(DocumentRef { id, label })
            })
            .collect();
        Ok(dedupe_documents(documents))
    }

    fn deliver(
        &self,
        package: Package,
        reporter: StatusReporter<'_>,
        cancel: &CancellationToken,
        total_units: usize,
        success_count: usize,
        permanent_failure_count: usize,
    ) -> Result<ExportSummary, ExportError> {
        check_cancelled(cancel)?;
        reporter.status(
            Stage::Saving,
            format!("Saving {} ({} bytes)", package.filename, package.bytes.len()),
        );
        let saved_to = self.sink.save(&package.filename, &package.bytes)?;
        Ok(ExportSummary {
            filename: package.filename,
            saved_to,
            byte_len: package.bytes.len() as u64,
            total_units,
            success_count,
            permanent_failure_count,
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ExportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_next_cancel(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.next_cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, kind: JobKind, target: &str) -> Result<ActiveJob<'_>, ExportError> {
        let mut guard = self.lock_state();
        let (next, effects) = update(
            std::mem::take(&mut *guard),
            Msg::StartRequested {
                kind,
                target: target.to_string(),
            },
        );
        *guard = next;
        drop(guard);

        for effect in effects {
            match effect {
                Effect::StartJob { job_id, .. } => {
                    engine_info!("Starting job {} ({:?} export of {:?})", job_id, kind, target);
                    self.progress.emit(ExportEvent::Status {
                        job_id,
                        stage: Stage::Queued,
                        message: format!("Export of {target} queued"),
                    });
                    return Ok(ActiveJob {
                        owner: self,
                        id: job_id,
                        cancel: self.lock_next_cancel().clone(),
                        finished: false,
                    });
                }
                Effect::RejectBusy { running } => {
                    engine_warn!("Rejected {:?} export: job {} still running", kind, running);
                    return Err(ExportError::Busy { running });
                }
            }
        }
        Err(ExportError::NothingToExport("start request produced no job".to_string()))
    }

    /// Records the outcome and arms a fresh token for the next job.
    fn settle(&self, job_id: JobId, result: JobResultKind) {
        {
            let mut guard = self.lock_state();
            let (next, _) = update(std::mem::take(&mut *guard), Msg::JobDone { job_id, result });
            *guard = next;
        }
        *self.lock_next_cancel() = self.shutdown.child_token();
    }
}

/// A started job. Dropping it before [`ActiveJob::finish`] runs, for example
/// when the caller abandons the export future, cancels the job and records it
/// as failed so the next start is accepted.
struct ActiveJob<'a> {
    owner: &'a ExportOrchestrator,
    id: JobId,
    cancel: CancellationToken,
    finished: bool,
}

impl ActiveJob<'_> {
    fn finish(
        mut self,
        result: Result<ExportSummary, ExportError>,
    ) -> Result<ExportSummary, ExportError> {
        self.finished = true;
        let kind = match &result {
            Ok(summary) => JobResultKind::Success {
                fetched: summary.success_count,
                failed: summary.permanent_failure_count,
            },
            Err(err) => JobResultKind::Failed {
                reason: err.to_string(),
            },
        };
        self.owner.settle(self.id, kind);
        if result.is_ok() {
            self.owner.progress.emit(ExportEvent::Status {
                job_id: self.id,
                stage: Stage::Done,
                message: "Export finished".to_string(),
            });
        }
        self.owner.progress.emit(ExportEvent::JobCompleted {
            job_id: self.id,
            result: result.as_ref().cloned().map_err(|err| err.to_string()),
        });
        result
    }
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        engine_warn!("Job {} was abandoned before it finished", self.id);
        self.cancel.cancel();
        self.owner.settle(
            self.id,
            JobResultKind::Failed {
                reason: ABANDONED.to_string(),
            },
        );
        self.owner.progress.emit(ExportEvent::JobCompleted {
            job_id: self.id,
            result: Err(ABANDONED.to_string()),
        });
    }
}

const ABANDONED: &str = "abandoned";

fn check_cancelled(cancel: &CancellationToken) -> Result<(), ExportError> {
    if cancel.is_cancelled() {
        Err(ExportError::Cancelled)
    } else {
        Ok(())
    }
}

/// Mirrors status events into the job state before forwarding them.
struct TrackedSink<'a> {
    state: &'a Mutex<ExportState>,
    inner: &'a dyn ProgressSink,
}

impl<'a> TrackedSink<'a> {
    fn new(state: &'a Mutex<ExportState>, inner: &'a dyn ProgressSink) -> Self {
        Self { state, inner }
    }
}

impl ProgressSink for TrackedSink<'_> {
    fn emit(&self, event: ExportEvent) {
        if let ExportEvent::Status {
            job_id, message, ..
        } = &event
        {
            let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let (next, _) = update(
                std::mem::take(&mut *guard),
                Msg::Status {
                    job_id: *job_id,
                    message: message.clone(),
                },
            );
            *guard = next;
        }
        self.inner.emit(event);
    }
}

struct ChapterFetch<'a> {
    pages: &'a dyn Fetcher,
    locator: &'a dyn ContentLocator,
    target: &'a StoryTarget,
}

#[async_trait::async_trait]
impl UnitFetch for ChapterFetch<'_> {
    async fn fetch_unit(&self, unit: &ContentUnit) -> Result<String, FetchError> {
        let chapter = unit.key.parse().unwrap_or(unit.sequence);
        let url = self
            .target
            .chapter_url(chapter)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let output = self.pages.fetch(&url).await?;
        let html = decode_fetched(&output)?;
        self.locator
            .locate(&html, LocatorKey::StoryText)
            .map(|found| found.inner_html)
            .ok_or_else(|| FetchError::new(FailureKind::ExtractionFailed, format!("no story text at {url}")))
    }
}

struct DocumentFetch<'a> {
    pages: &'a dyn Fetcher,
    locator: &'a dyn ContentLocator,
    site: &'a SiteConfig,
}

#[async_trait::async_trait]
impl UnitFetch for DocumentFetch<'_> {
    async fn fetch_unit(&self, unit: &ContentUnit) -> Result<String, FetchError> {
        let url = document_url(self.site, &self.site.document_path, &unit.key)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let output = self.pages.fetch(&url).await?;
        let html = decode_fetched(&output)?;
        self.locator
            .locate(&html, LocatorKey::DocumentText)
            .map(|found| found.markup().to_string())
            .ok_or_else(|| {
                FetchError::new(FailureKind::ExtractionFailed, format!("no document text at {url}"))
            })
    }
}

fn sanitize_unit(mut unit: ContentUnit) -> ContentUnit {
    unit.raw_content = unit.raw_content.map(|raw| sanitize_fragment(&raw));
    unit
}

fn dedupe_documents(documents: Vec<DocumentRef>) -> Vec<DocumentRef> {
    let mut seen = HashSet::new();
    documents
        .into_iter()
        .filter(|doc| !doc.id.trim().is_empty() && seen.insert(doc.id.clone()))
        .collect()
}

fn describe_batch(documents: &[DocumentRef]) -> String {
    if documents.is_empty() {
        "all documents".to_string()
    } else {
        format!("{} documents", documents.len())
    }
}
