use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use archiver_core::{JobPhase, JobResultKind};
use archiver_engine::{
    ChannelProgressSink, DocumentRef, EngineConfig, ExportError, ExportEvent, ExportOrchestrator,
    FailureKind, FetchError, FetchMetadata, FetchOutput, Fetcher, PersistError, SaveSink,
    ScheduleSettings, Stage,
};
use chrono::{FixedOffset, TimeZone, Utc};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

const BASE: &str = "https://www.example.net";
const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 7, 7];

/// Serves canned bodies by exact url; anything else is a 404.
#[derive(Default)]
struct CannedFetcher {
    pages: HashMap<String, (Vec<u8>, &'static str)>,
    delay: Option<Duration>,
    requested: Mutex<Vec<String>>,
}

impl CannedFetcher {
    fn page(mut self, url: &str, html: &str) -> Self {
        self.pages
            .insert(url.to_string(), (html.as_bytes().to_vec(), "text/html; charset=utf-8"));
        self
    }

    fn image(mut self, url: &str, bytes: &[u8]) -> Self {
        self.pages.insert(url.to_string(), (bytes.to_vec(), "image/png"));
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Fetcher for CannedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchOutput, FetchError> {
        self.requested.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let Some((bytes, content_type)) = self.pages.get(url) else {
            return Err(FetchError::new(FailureKind::HttpStatus(404), "not found"));
        };
        Ok(FetchOutput {
            bytes: bytes.clone(),
            metadata: FetchMetadata {
                original_url: url.to_string(),
                final_url: url.to_string(),
                redirect_count: 0,
                content_type: Some(content_type.to_string()),
                byte_len: bytes.len() as u64,
            },
        })
    }
}

#[derive(Default)]
struct MemorySink {
    saved: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemorySink {
    fn single(&self) -> (String, Vec<u8>) {
        let saved = self.saved.lock().unwrap();
        assert_eq!(saved.len(), 1, "exactly one package saved");
        saved[0].clone()
    }

    fn is_empty(&self) -> bool {
        self.saved.lock().unwrap().is_empty()
    }
}

impl SaveSink for MemorySink {
    fn save(&self, filename: &str, bytes: &[u8]) -> Result<Option<PathBuf>, PersistError> {
        self.saved
            .lock()
            .unwrap()
            .push((filename.to_string(), bytes.to_vec()));
        Ok(None)
    }
}

fn instant_config() -> EngineConfig {
    let immediate = ScheduleSettings {
        min_delay_ms: 0,
        max_delay_ms: 0,
        cooldown_ms: 0,
        retry_delay_ms: 0,
        fetch_timeout_ms: None,
    };
    let mut config = EngineConfig::default();
    config.site.base_url = BASE.to_string();
    config.chapters = immediate.clone();
    config.documents = immediate;
    config
}

fn story_page(body: &str) -> String {
    format!(
        r#"<html><body>
<div id="pre_story_links"><a href="/book/">Books</a> » <a href="/book/Some-Fandom/">Some Fandom</a></div>
<div id="profile_top">
  <img class="cimage" src="//img.example.net/image/9/75/">
  <b class="xcontrast_txt">The Tale</b> By: <a class="xcontrast_txt" href="/u/5/Writer">Writer</a>
  <div class="xcontrast_txt">A short summary &amp; more.</div>
  <span class="xgray xcontrast_txt">Rated: Fiction T - English - Adventure/Humor - Chapters: 3 - Words: 12,345 - Reviews: 10 - Favs: 20 - Follows: 30 - Updated: <span data-xutime="1600000000">Sep 13, 2020</span> - Published: <span data-xutime="1500000000">Jul 14, 2017</span> - id: 4242</span>
</div>
<select id="chap_select"><option value="1" selected>1. Start</option><option value="2">2. Middle</option><option value="3">3. End</option></select>
<div id="storytext">{body}</div>
<select id="chap_select"><option value="1" selected>1. Start</option><option value="2">2. Middle</option><option value="3">3. End</option></select>
</body></html>"#
    )
}

fn read_entry(bytes: &[u8], name: &str) -> String {
    let mut archive = ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut text = String::new();
    entry.read_to_string(&mut text).unwrap();
    text
}

fn entry_names(bytes: &[u8]) -> Vec<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    (0..archive.len())
        .map(|index| archive.by_index(index).unwrap().name().to_string())
        .collect()
}

fn story_fetchers() -> (CannedFetcher, CannedFetcher) {
    let pages = CannedFetcher::default()
        .page(
            &format!("{BASE}/s/4242/1/"),
            &story_page("<p>Chapter one.<br>Still one.</p>"),
        )
        .page(&format!("{BASE}/s/4242/3/"), &story_page("<p>The end"));
    let images = CannedFetcher::default()
        .image("https://img.example.net/image/9/150/", PNG);
    (pages, images)
}

#[tokio::test]
async fn story_export_packages_every_chapter_with_placeholders() {
    let (pages, images) = story_fetchers();
    let pages = Arc::new(pages.page(
        &format!("{BASE}/s/4242/1/The-Tale/"),
        &story_page("<p>Chapter one.<br>Still one.</p>"),
    ));
    let images = Arc::new(images);
    let sink = Arc::new(MemorySink::default());
    let (progress, events) = ChannelProgressSink::pair();

    let orchestrator = ExportOrchestrator::new(instant_config(), sink.clone())
        .with_fetchers(pages.clone(), images.clone())
        .with_progress(Arc::new(progress));

    let summary = orchestrator
        .export_story(&format!("{BASE}/s/4242/2/The-Tale"))
        .await
        .expect("story exported");

    assert_eq!(summary.filename, "The Tale.epub");
    assert_eq!(summary.total_units, 3);
    assert_eq!(summary.success_count, 2);
    assert_eq!(summary.permanent_failure_count, 1);
    assert_eq!(summary.saved_to, None);

    // seed, three chapters, one retry of chapter two
    let requested = pages.requested();
    assert_eq!(requested[0], format!("{BASE}/s/4242/1/The-Tale/"));
    assert_eq!(
        requested[1..].to_vec(),
        vec![
            format!("{BASE}/s/4242/1/"),
            format!("{BASE}/s/4242/2/"),
            format!("{BASE}/s/4242/3/"),
            format!("{BASE}/s/4242/2/"),
        ]
    );
    assert_eq!(
        images.requested(),
        vec![
            "https://img.example.net/image/9/180/".to_string(),
            "https://img.example.net/image/9/150/".to_string(),
        ]
    );

    let (filename, bytes) = sink.single();
    assert_eq!(filename, "The Tale.epub");
    assert_eq!(bytes.len() as u64, summary.byte_len);
    let names = entry_names(&bytes);
    assert_eq!(names[0], "mimetype");
    assert!(names.contains(&"OEBPS/cover.png".to_string()));

    let opf = read_entry(&bytes, "OEBPS/content.opf");
    assert!(opf.contains("<dc:title>The Tale</dc:title>"));
    assert!(opf.contains("<dc:creator opf:role=\"aut\">Writer</dc:creator>"));
    assert!(opf.contains("<dc:publisher>Some Fandom</dc:publisher>"));
    assert!(opf.contains("<dc:date opf:event=\"publication\">2017-07-14</dc:date>"));
    assert!(opf.contains("<dc:date opf:event=\"modification\">2020-09-13</dc:date>"));

    let title = read_entry(&bytes, "OEBPS/title.xhtml");
    assert!(title.contains("<dd>T</dd>"));
    assert!(title.contains("<dd>12,345</dd>"));
    assert!(title.contains("href=\"https://www.example.net/u/5/Writer\""));

    let first = read_entry(&bytes, "OEBPS/chapter-0001.xhtml");
    assert!(first.contains("<h2>1. Start</h2>"));
    assert!(first.contains("<p>Chapter one.<br />Still one.</p>"));
    let middle = read_entry(&bytes, "OEBPS/chapter-0002.xhtml");
    assert!(middle.contains("could not be retrieved"));
    let last = read_entry(&bytes, "OEBPS/chapter-0003.xhtml");
    assert!(last.contains("<p>The end</p>"));

    let events: Vec<ExportEvent> = events.try_iter().collect();
    assert!(matches!(
        events.first(),
        Some(ExportEvent::Status {
            job_id: 1,
            stage: Stage::Queued,
            ..
        })
    ));
    assert!(matches!(
        events.last(),
        Some(ExportEvent::JobCompleted { job_id: 1, result: Ok(_) })
    ));

    let view = orchestrator.view();
    assert_eq!(view.phase, JobPhase::Succeeded);
    assert_eq!(
        view.last_result,
        Some(JobResultKind::Success {
            fetched: 2,
            failed: 1
        })
    );
}

#[tokio::test]
async fn story_without_cover_when_disabled() {
    let (pages, images) = story_fetchers();
    let images = Arc::new(images);
    let sink = Arc::new(MemorySink::default());
    let mut config = instant_config();
    config.cover.enabled = false;

    let orchestrator = ExportOrchestrator::new(config, sink.clone())
        .with_fetchers(Arc::new(pages), images.clone());
    orchestrator.export_story("4242").await.expect("story exported");

    assert!(images.requested().is_empty());
    let (_, bytes) = sink.single();
    assert!(entry_names(&bytes).iter().all(|name| !name.contains("cover")));
}

#[tokio::test]
async fn unreachable_seed_fails_the_job_without_saving() {
    let sink = Arc::new(MemorySink::default());
    let orchestrator = ExportOrchestrator::new(instant_config(), sink.clone()).with_fetchers(
        Arc::new(CannedFetcher::default()),
        Arc::new(CannedFetcher::default()),
    );

    let err = orchestrator.export_story("4242").await.unwrap_err();
    assert!(matches!(
        err,
        ExportError::Seed {
            source: FetchError {
                kind: FailureKind::HttpStatus(404),
                ..
            },
            ..
        }
    ));
    assert!(sink.is_empty());
    assert_eq!(orchestrator.view().phase, JobPhase::Failed);
}

#[tokio::test]
async fn invalid_target_is_rejected_before_fetching() {
    let pages = Arc::new(CannedFetcher::default());
    let orchestrator = ExportOrchestrator::new(instant_config(), Arc::new(MemorySink::default()))
        .with_fetchers(pages.clone(), Arc::new(CannedFetcher::default()));

    let err = orchestrator
        .export_story("https://www.example.net/u/5/Writer")
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::Target(_)));
    assert!(pages.requested().is_empty());
}

#[tokio::test(start_paused = true)]
async fn overlapping_start_is_rejected() {
    let (pages, images) = story_fetchers();
    let sink = Arc::new(MemorySink::default());
    let orchestrator = ExportOrchestrator::new(instant_config(), sink.clone())
        .with_fetchers(Arc::new(pages.slow(Duration::from_secs(1))), Arc::new(images));

    let (story, document) = tokio::join!(
        orchestrator.export_story("4242"),
        orchestrator.export_document("55", None)
    );

    assert!(story.is_ok());
    assert!(matches!(document, Err(ExportError::Busy { running: 1 })));
    assert_eq!(sink.single().0, "The Tale.epub");

    // A finished job frees the slot.
    assert!(!orchestrator.view().is_busy());
}

#[tokio::test]
async fn cancelled_job_saves_nothing() {
    let (pages, images) = story_fetchers();
    let sink = Arc::new(MemorySink::default());
    let orchestrator = ExportOrchestrator::new(instant_config(), sink.clone())
        .with_fetchers(Arc::new(pages), Arc::new(images));
    orchestrator.cancellation().cancel();

    let err = orchestrator.export_story("4242").await.unwrap_err();
    assert!(matches!(err, ExportError::Cancelled));
    assert!(sink.is_empty());
}

#[tokio::test]
async fn cancellation_ends_with_its_job() {
    let (pages, images) = story_fetchers();
    let sink = Arc::new(MemorySink::default());
    let orchestrator = ExportOrchestrator::new(instant_config(), sink.clone())
        .with_fetchers(Arc::new(pages), Arc::new(images));
    orchestrator.cancellation().cancel();

    let err = orchestrator.export_story("4242").await.unwrap_err();
    assert!(matches!(err, ExportError::Cancelled));
    assert!(!orchestrator.cancellation().is_cancelled());

    let summary = orchestrator.export_story("4242").await.expect("second job runs");
    assert_eq!(summary.filename, "The Tale.epub");
    assert_eq!(sink.single().0, "The Tale.epub");
}

#[tokio::test(start_paused = true)]
async fn running_job_can_be_cancelled() {
    let (pages, images) = story_fetchers();
    let sink = Arc::new(MemorySink::default());
    let orchestrator = ExportOrchestrator::new(instant_config(), sink.clone())
        .with_fetchers(Arc::new(pages.slow(Duration::from_secs(1))), Arc::new(images));

    let (story, ()) = tokio::join!(orchestrator.export_story("4242"), async {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        orchestrator.cancellation().cancel();
    });

    assert!(matches!(story, Err(ExportError::Cancelled)));
    assert!(sink.is_empty());
    assert_eq!(orchestrator.view().phase, JobPhase::Failed);
}

#[tokio::test]
async fn shutdown_token_stops_every_job() {
    let (pages, images) = story_fetchers();
    let pages = Arc::new(pages);
    let shutdown = CancellationToken::new();
    let orchestrator = ExportOrchestrator::new(instant_config(), Arc::new(MemorySink::default()))
        .with_fetchers(pages.clone(), Arc::new(images))
        .with_cancellation(shutdown.clone());
    shutdown.cancel();

    for _ in 0..2 {
        let err = orchestrator.export_story("4242").await.unwrap_err();
        assert!(matches!(err, ExportError::Cancelled));
    }
    assert!(pages.requested().is_empty());
}

#[tokio::test(start_paused = true)]
async fn abandoned_job_frees_the_slot() {
    let (pages, images) = story_fetchers();
    let sink = Arc::new(MemorySink::default());
    let (progress, events) = ChannelProgressSink::pair();
    let orchestrator = ExportOrchestrator::new(instant_config(), sink.clone())
        .with_fetchers(Arc::new(pages.slow(Duration::from_secs(10))), Arc::new(images))
        .with_progress(Arc::new(progress));

    let abandoned =
        tokio::time::timeout(Duration::from_secs(5), orchestrator.export_story("4242")).await;
    assert!(abandoned.is_err());

    let view = orchestrator.view();
    assert_eq!(view.phase, JobPhase::Failed);
    assert_eq!(
        view.last_result,
        Some(JobResultKind::Failed {
            reason: "abandoned".to_string()
        })
    );
    let seen: Vec<ExportEvent> = events.try_iter().collect();
    assert!(matches!(
        seen.last(),
        Some(ExportEvent::JobCompleted { job_id: 1, result: Err(reason) }) if reason == "abandoned"
    ));

    let summary = orchestrator
        .export_story("4242")
        .await
        .expect("next job starts");
    assert_eq!(summary.filename, "The Tale.epub");
    assert_eq!(sink.single().0, "The Tale.epub");
    assert!(matches!(
        events.try_iter().last(),
        Some(ExportEvent::JobCompleted { job_id: 2, result: Ok(_) })
    ));
}

fn document_page(markup: &str) -> String {
    format!(
        r#"<html><body><form><textarea name="bio">{}</textarea></form></body></html>"#,
        markup.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
    )
}

#[tokio::test]
async fn single_document_is_saved_as_markdown() {
    let pages = CannedFetcher::default().page(
        &format!("{BASE}/docs/edit.php?docid=55"),
        &document_page("<p>Hello <b>world</b></p>"),
    );
    let sink = Arc::new(MemorySink::default());
    let fetched_at = Utc.with_ymd_and_hms(2024, 3, 5, 6, 7, 8).unwrap();
    let orchestrator = ExportOrchestrator::new(instant_config(), sink.clone())
        .with_fetchers(Arc::new(pages), Arc::new(CannedFetcher::default()))
        .with_clock(Arc::new(move || fetched_at.fixed_offset()));

    let summary = orchestrator
        .export_document("55", Some("Notes"))
        .await
        .expect("document exported");
    assert_eq!(summary.filename, "Notes.md");
    assert_eq!(summary.success_count, 1);

    let (filename, bytes) = sink.single();
    assert_eq!(filename, "Notes.md");
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("---\ntitle: Notes\n"));
    assert!(text.contains(&format!("source: {BASE}/docs/edit.php?docid=55\n")));
    assert!(text.contains("fetched_utc: 2024-03-05T06:07:08+00:00\n"));
    assert!(text.contains("# Notes"));
    assert!(text.contains("**world**"));
}

#[tokio::test]
async fn missing_single_document_fails_the_job() {
    let sink = Arc::new(MemorySink::default());
    let orchestrator = ExportOrchestrator::new(instant_config(), sink.clone()).with_fetchers(
        Arc::new(CannedFetcher::default()),
        Arc::new(CannedFetcher::default()),
    );

    let err = orchestrator.export_document("77", None).await.unwrap_err();
    assert!(matches!(err, ExportError::NothingToExport(_)));
    assert!(sink.is_empty());
}

#[tokio::test]
async fn document_batch_lists_and_archives_every_document() {
    let listing = r#"<html><body><table>
<tr><td><a href="/docs/edit.php?docid=55">Notes</a></td></tr>
<tr><td><a href="edit.php?docid=56">Draft: two</a></td></tr>
<tr><td><a href="/docs/edit.php?docid=55">Notes again</a></td></tr>
</table></body></html>"#;
    let pages = Arc::new(
        CannedFetcher::default()
            .page(&format!("{BASE}/docs/docs.php"), listing)
            .page(
                &format!("{BASE}/docs/edit.php?docid=55"),
                &document_page("<p>First</p>"),
            ),
    );
    let sink = Arc::new(MemorySink::default());
    let now = Utc.with_ymd_and_hms(2024, 3, 5, 6, 7, 8).unwrap();
    let orchestrator = ExportOrchestrator::new(instant_config(), sink.clone())
        .with_fetchers(pages.clone(), Arc::new(CannedFetcher::default()))
        .with_clock(Arc::new(move || now.fixed_offset()));

    let summary = orchestrator
        .export_documents(Vec::new())
        .await
        .expect("batch exported");
    assert_eq!(summary.filename, "documents_2024-03-05-06-07-08.zip");
    assert_eq!(summary.total_units, 2);
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.permanent_failure_count, 1);

    let (_, bytes) = sink.single();
    assert_eq!(
        entry_names(&bytes),
        vec!["001_Notes.md".to_string(), "002_Draft- two_ERROR.txt".to_string()]
    );
    assert!(read_entry(&bytes, "001_Notes.md").contains("First"));
    assert!(read_entry(&bytes, "002_Draft- two_ERROR.txt").contains("56"));
}

#[tokio::test]
async fn document_batch_uses_given_ids_without_listing() {
    let pages = Arc::new(CannedFetcher::default().page(
        &format!("{BASE}/docs/edit.php?docid=9"),
        &document_page("<p>Nine</p>"),
    ));
    let sink = Arc::new(MemorySink::default());
    let orchestrator = ExportOrchestrator::new(instant_config(), sink.clone())
        .with_fetchers(pages.clone(), Arc::new(CannedFetcher::default()));

    let summary = orchestrator
        .export_documents(vec![DocumentRef {
            id: "9".into(),
            label: "Nine".into(),
        }])
        .await
        .expect("batch exported");
    assert_eq!(summary.total_units, 1);
    assert_eq!(
        pages.requested(),
        vec![format!("{BASE}/docs/edit.php?docid=9")]
    );
}

#[tokio::test]
async fn document_batch_archive_is_named_by_local_time() {
    let pages = Arc::new(CannedFetcher::default().page(
        &format!("{BASE}/docs/edit.php?docid=9"),
        &document_page("<p>Nine</p>"),
    ));
    let sink = Arc::new(MemorySink::default());
    let local = FixedOffset::east_opt(2 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 3, 5, 8, 7, 8)
        .unwrap();
    let orchestrator = ExportOrchestrator::new(instant_config(), sink.clone())
        .with_fetchers(pages, Arc::new(CannedFetcher::default()))
        .with_clock(Arc::new(move || local));

    let summary = orchestrator
        .export_documents(vec![DocumentRef {
            id: "9".into(),
            label: "Nine".into(),
        }])
        .await
        .expect("batch exported");
    assert_eq!(summary.filename, "documents_2024-03-05-08-07-08.zip");

    let (_, bytes) = sink.single();
    assert!(read_entry(&bytes, "001_Nine.md").contains("fetched_utc: 2024-03-05T06:07:08+00:00\n"));
}
