use std::io::{Cursor, Read};

use archiver_engine::{
    build_epub, build_flat_archive, cover_art, sanitize_fragment, ContentUnit, Package,
    StoryMetadata, UnitStatus, ERROR_SUFFIX, PLACEHOLDER_TEXT,
};
use pretty_assertions::assert_eq;
use zip::{CompressionMethod, ZipArchive};

fn open(package: &Package) -> ZipArchive<Cursor<Vec<u8>>> {
    ZipArchive::new(Cursor::new(package.bytes.clone())).expect("valid zip")
}

fn read_entry(package: &Package, name: &str) -> String {
    let mut archive = open(package);
    let mut entry = archive.by_name(name).expect("entry present");
    let mut text = String::new();
    entry.read_to_string(&mut text).expect("utf-8 entry");
    text
}

fn entry_names(package: &Package) -> Vec<String> {
    let mut archive = open(package);
    (0..archive.len())
        .map(|index| archive.by_index(index).unwrap().name().to_string())
        .collect()
}

fn fetched(sequence: u32, label: &str, body: &str) -> ContentUnit {
    let mut unit = ContentUnit::new(sequence, sequence.to_string(), label);
    unit.raw_content = Some(sanitize_fragment(body));
    unit.status = UnitStatus::Fetched;
    unit
}

fn failed(sequence: u32, label: &str) -> ContentUnit {
    let mut unit = ContentUnit::new(sequence, sequence.to_string(), label);
    unit.status = UnitStatus::Failed;
    unit
}

fn metadata() -> StoryMetadata {
    StoryMetadata {
        id: "4242".into(),
        title: "Tom & Jerry <3".into(),
        author: "Some Author".into(),
        canonical_url: "https://www.example.net/s/4242/1/".into(),
        published: Some("2019-05-01".into()),
        updated: Some("2020-01-02".into()),
        language: Some("French".into()),
        genre: Some("Humor/Romance".into()),
        ..StoryMetadata::default()
    }
}

fn chapters() -> Vec<ContentUnit> {
    vec![
        fetched(1, "Beginnings", "<p>First<br>line</p>"),
        failed(2, "Middle"),
        fetched(3, "End", "<p>Last"),
    ]
}

#[test]
fn mimetype_is_first_and_uncompressed() {
    let package = build_epub(&metadata(), &chapters()).unwrap();
    let mut archive = open(&package);
    let mut first = archive.by_index(0).unwrap();
    assert_eq!(first.name(), "mimetype");
    assert_eq!(first.compression(), CompressionMethod::Stored);
    let mut text = String::new();
    first.read_to_string(&mut text).unwrap();
    assert_eq!(text, "application/epub+zip");
}

#[test]
fn spine_lists_title_toc_then_chapters_in_order() {
    let package = build_epub(&metadata(), &chapters()).unwrap();
    let opf = read_entry(&package, "OEBPS/content.opf");
    let spine = opf.split("<spine").nth(1).unwrap();
    let positions: Vec<usize> = [
        "idref=\"title\"",
        "idref=\"toc\"",
        "idref=\"chapter-1\"",
        "idref=\"chapter-2\"",
        "idref=\"chapter-3\"",
    ]
    .iter()
    .map(|needle| spine.find(needle).expect(needle))
    .collect();
    let mut sorted = positions.clone();
    sorted.sort_unstable();
    assert_eq!(positions, sorted);

    let ncx = read_entry(&package, "OEBPS/toc.ncx");
    assert!(ncx.contains("playOrder=\"1\""));
    assert!(ncx.contains("playOrder=\"5\""));
    assert!(!ncx.contains("playOrder=\"6\""));
}

#[test]
fn failed_unit_becomes_placeholder_and_keeps_its_slot() {
    let package = build_epub(&metadata(), &chapters()).unwrap();
    let names = entry_names(&package);
    assert!(names.contains(&"OEBPS/chapter-0002.xhtml".to_string()));

    let middle = read_entry(&package, "OEBPS/chapter-0002.xhtml");
    assert!(middle.contains(PLACEHOLDER_TEXT));
    assert!(middle.contains("<h2>Middle</h2>"));

    let toc = read_entry(&package, "OEBPS/toc.xhtml");
    assert!(toc.contains("<a href=\"chapter-0002.xhtml\">Middle</a>"));
}

#[test]
fn sanitized_markup_is_well_formed_in_chapters() {
    let package = build_epub(&metadata(), &chapters()).unwrap();
    let first = read_entry(&package, "OEBPS/chapter-0001.xhtml");
    assert!(first.contains("<p>First<br />line</p>"));
    let last = read_entry(&package, "OEBPS/chapter-0003.xhtml");
    assert!(last.contains("<p>Last</p>"));
}

#[test]
fn metadata_text_is_escaped() {
    let package = build_epub(&metadata(), &chapters()).unwrap();
    let opf = read_entry(&package, "OEBPS/content.opf");
    assert!(opf.contains("<dc:title>Tom &amp; Jerry &lt;3</dc:title>"));
    assert!(opf.contains("<dc:language>fr</dc:language>"));
    assert!(opf.contains("<dc:subject>Humor</dc:subject>"));
    assert!(opf.contains("<dc:subject>Romance</dc:subject>"));
    assert!(opf.contains("<dc:date opf:event=\"publication\">2019-05-01</dc:date>"));

    let title = read_entry(&package, "OEBPS/title.xhtml");
    assert!(title.contains("<h1>Tom &amp; Jerry &lt;3</h1>"));
}

#[test]
fn absent_cover_is_referenced_nowhere() {
    let package = build_epub(&metadata(), &chapters()).unwrap();
    let names = entry_names(&package);
    assert!(names.iter().all(|name| !name.contains("cover")));

    let opf = read_entry(&package, "OEBPS/content.opf");
    assert!(!opf.contains("cover"));
    let ncx = read_entry(&package, "OEBPS/toc.ncx");
    assert!(!ncx.contains("cover"));
}

#[test]
fn present_cover_is_referenced_everywhere() {
    let mut meta = metadata();
    meta.cover = Some(cover_art(vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3]));
    let package = build_epub(&meta, &chapters()).unwrap();

    let names = entry_names(&package);
    assert!(names.contains(&"OEBPS/cover.jpg".to_string()));
    assert!(names.contains(&"OEBPS/cover.xhtml".to_string()));

    let opf = read_entry(&package, "OEBPS/content.opf");
    assert!(opf.contains("<meta name=\"cover\" content=\"cover-image\"/>"));
    assert!(opf.contains("href=\"cover.jpg\" media-type=\"image/jpeg\""));
    assert!(opf.contains("<itemref idref=\"cover\"/>"));
    assert!(opf.contains("<reference type=\"cover\""));

    let cover_page = read_entry(&package, "OEBPS/cover.xhtml");
    assert!(cover_page.contains("src=\"cover.jpg\""));

    let ncx = read_entry(&package, "OEBPS/toc.ncx");
    assert!(ncx.contains("<content src=\"cover.xhtml\"/>"));
    assert!(ncx.contains("playOrder=\"6\""));
}

#[test]
fn identical_input_builds_identical_bytes() {
    let first = build_epub(&metadata(), &chapters()).unwrap();
    let second = build_epub(&metadata(), &chapters()).unwrap();
    assert_eq!(first.filename, second.filename);
    assert!(first.bytes == second.bytes);
}

#[test]
fn package_is_named_after_the_title() {
    let mut meta = metadata();
    meta.title = "My/Story?".into();
    let package = build_epub(&meta, &chapters()).unwrap();
    assert_eq!(package.filename, "My-Story-.epub");
}

#[test]
fn unordered_units_are_rejected() {
    let units = vec![fetched(2, "Two", "<p>2</p>"), fetched(1, "One", "<p>1</p>")];
    assert!(build_epub(&metadata(), &units).is_err());
    assert!(build_epub(&metadata(), &[]).is_err());
}

#[test]
fn flat_archive_has_one_entry_per_unit() {
    let units = vec![
        fetched(1, "Notes", "<p>a</p>"),
        failed(2, "Draft: two"),
        fetched(3, "Notes", "<p>c</p>"),
    ];
    let package = build_flat_archive("documents_2024-03-05-06-07-08.zip".into(), &units, ".md")
        .unwrap();
    assert_eq!(package.filename, "documents_2024-03-05-06-07-08.zip");
    assert_eq!(
        entry_names(&package),
        vec![
            "001_Notes.md".to_string(),
            format!("002_Draft- two{ERROR_SUFFIX}"),
            "003_Notes.md".to_string(),
        ]
    );

    let marker = read_entry(&package, &format!("002_Draft- two{ERROR_SUFFIX}"));
    assert!(marker.contains("Draft: two"));
    assert!(marker.contains("could not be retrieved"));
    assert_eq!(read_entry(&package, "001_Notes.md"), "<p>a</p>");
}
