//! EPUB 2 package assembly.
//!
//! Manifest, spine, guide and NCX navigation are all rendered from one
//! [`PackageItem`] plan, so an optional cover is either referenced everywhere
//! or nowhere.

use std::io::{Cursor, Write};

use chrono::NaiveDate;
use engine_logging::engine_debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::filename::package_filename;
use crate::metadata::{StoryMetadata, StoryStatus};
use crate::sanitize::{escape_attr, escape_xml};
use crate::ContentUnit;

const MIMETYPE: &str = "application/epub+zip";
const XHTML: &str = "application/xhtml+xml";
const OEBPS: &str = "OEBPS";

pub const PLACEHOLDER_TEXT: &str =
    "This chapter could not be retrieved after repeated attempts.";

const STYLESHEET: &str = "body { font-family: serif; margin: 0 5%; line-height: 1.4; }
h1, h2 { text-align: center; }
p { margin: 0.6em 0; }
.cover { text-align: center; margin: 0; padding: 0; }
.cover img { max-width: 100%; max-height: 100%; }
.details { margin: 1em 0; }
.details dt { font-weight: bold; }
.missing { font-style: italic; text-align: center; }
";

/// A finished package. Only ever built complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no content units to package")]
    Empty,
    #[error("unit at position {position} has sequence {found}")]
    BrokenSequence { position: usize, found: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemRole {
    CoverImage,
    CoverPage,
    TitlePage,
    TocPage,
    Chapter(u32),
    Stylesheet,
    Ncx,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageItem {
    pub id: String,
    /// Path relative to the OPF document.
    pub href: String,
    pub media_type: &'static str,
    pub role: ItemRole,
    /// Navigation label; `None` for items outside the reading order.
    pub nav_label: Option<String>,
}

impl PackageItem {
    pub fn in_spine(&self) -> bool {
        self.nav_label.is_some()
    }
}

/// Deterministic content document name for a unit; depends only on the sequence number.
pub fn chapter_filename(sequence: u32) -> String {
    format!("chapter-{sequence:04}.xhtml")
}

/// Every manifest item in manifest order. Spine order is the subsequence with a nav label:
/// cover page (if any), title page, contents page, then units in sequence.
pub fn package_plan(meta: &StoryMetadata, units: &[ContentUnit]) -> Vec<PackageItem> {
    let mut items = vec![
        PackageItem {
            id: "ncx".into(),
            href: "toc.ncx".into(),
            media_type: "application/x-dtbncx+xml",
            role: ItemRole::Ncx,
            nav_label: None,
        },
        PackageItem {
            id: "css".into(),
            href: "stylesheet.css".into(),
            media_type: "text/css",
            role: ItemRole::Stylesheet,
            nav_label: None,
        },
    ];
    if let Some(cover) = &meta.cover {
        items.push(PackageItem {
            id: "cover-image".into(),
            href: format!("cover.{}", cover.extension),
            media_type: cover.media_type,
            role: ItemRole::CoverImage,
            nav_label: None,
        });
        items.push(PackageItem {
            id: "cover".into(),
            href: "cover.xhtml".into(),
            media_type: XHTML,
            role: ItemRole::CoverPage,
            nav_label: Some("Cover".into()),
        });
    }
    items.push(PackageItem {
        id: "title".into(),
        href: "title.xhtml".into(),
        media_type: XHTML,
        role: ItemRole::TitlePage,
        nav_label: Some("Title Page".into()),
    });
    items.push(PackageItem {
        id: "toc".into(),
        href: "toc.xhtml".into(),
        media_type: XHTML,
        role: ItemRole::TocPage,
        nav_label: Some("Table of Contents".into()),
    });
    items.extend(units.iter().map(|unit| PackageItem {
        id: format!("chapter-{}", unit.sequence),
        href: chapter_filename(unit.sequence),
        media_type: XHTML,
        role: ItemRole::Chapter(unit.sequence),
        nav_label: Some(unit.label.clone()),
    }));
    items
}

/// Builds the e-book. `units` must be sanitized and ordered `1..=N`; failed units
/// become placeholder chapters.
pub fn build_epub(meta: &StoryMetadata, units: &[ContentUnit]) -> Result<Package, PackageError> {
    if units.is_empty() {
        return Err(PackageError::Empty);
    }
    for (position, unit) in units.iter().enumerate() {
        if unit.sequence as usize != position + 1 {
            return Err(PackageError::BrokenSequence {
                position,
                found: unit.sequence,
            });
        }
    }

    let plan = package_plan(meta, units);
    let stored = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(DateTime::default());
    let deflated = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    // Must be the first entry, uncompressed.
    zip.start_file("mimetype", stored)?;
    zip.write_all(MIMETYPE.as_bytes())?;

    zip.start_file("META-INF/container.xml", deflated)?;
    zip.write_all(render_container().as_bytes())?;

    zip.start_file(format!("{OEBPS}/content.opf"), deflated)?;
    zip.write_all(render_opf(meta, &plan).as_bytes())?;

    zip.start_file(format!("{OEBPS}/toc.ncx"), deflated)?;
    zip.write_all(render_ncx(meta, &plan).as_bytes())?;

    for item in &plan {
        let path = format!("{OEBPS}/{}", item.href);
        match item.role {
            ItemRole::Ncx => {}
            ItemRole::Stylesheet => {
                zip.start_file(path, deflated)?;
                zip.write_all(STYLESHEET.as_bytes())?;
            }
            ItemRole::CoverImage => {
                if let Some(cover) = &meta.cover {
                    zip.start_file(path, stored)?;
                    zip.write_all(&cover.bytes)?;
                }
            }
            ItemRole::CoverPage => {
                let image = plan
                    .iter()
                    .find(|candidate| candidate.role == ItemRole::CoverImage)
                    .map(|candidate| candidate.href.as_str())
                    .unwrap_or_default();
                zip.start_file(path, deflated)?;
                zip.write_all(render_cover_page(image).as_bytes())?;
            }
            ItemRole::TitlePage => {
                zip.start_file(path, deflated)?;
                zip.write_all(render_title_page(meta).as_bytes())?;
            }
            ItemRole::TocPage => {
                zip.start_file(path, deflated)?;
                zip.write_all(render_toc_page(units).as_bytes())?;
            }
            ItemRole::Chapter(sequence) => {
                let unit = &units[sequence as usize - 1];
                zip.start_file(path, deflated)?;
                zip.write_all(render_chapter(unit).as_bytes())?;
            }
        }
    }

    let bytes = zip.finish()?.into_inner();
    engine_debug!("Packaged {} items into {} bytes", plan.len() + 3, bytes.len());
    Ok(Package {
        filename: package_filename(&meta.title, "epub"),
        bytes,
    })
}

fn render_container() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="{OEBPS}/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#
    )
}

fn book_identifier(meta: &StoryMetadata) -> String {
    if meta.canonical_url.is_empty() {
        format!("urn:story:{}", meta.id)
    } else {
        meta.canonical_url.clone()
    }
}

fn iso_date(value: Option<&str>) -> Option<&str> {
    value.filter(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").is_ok())
}

fn render_opf(meta: &StoryMetadata, plan: &[PackageItem]) -> String {
    let mut opf = String::new();
    opf.push_str(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="BookId">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
"#,
    );
    opf.push_str(&format!("    <dc:title>{}</dc:title>\n", escape_xml(&meta.title)));
    opf.push_str(&format!(
        "    <dc:creator opf:role=\"aut\">{}</dc:creator>\n",
        escape_xml(&meta.author)
    ));
    opf.push_str(&format!(
        "    <dc:identifier id=\"BookId\">{}</dc:identifier>\n",
        escape_xml(&book_identifier(meta))
    ));
    opf.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        language_code(meta.language.as_deref())
    ));
    if !meta.description.is_empty() {
        opf.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            escape_xml(&meta.description)
        ));
    }
    if !meta.source_label.is_empty() {
        opf.push_str(&format!(
            "    <dc:publisher>{}</dc:publisher>\n",
            escape_xml(&meta.source_label)
        ));
    }
    if !meta.canonical_url.is_empty() {
        opf.push_str(&format!(
            "    <dc:source>{}</dc:source>\n",
            escape_xml(&meta.canonical_url)
        ));
    }
    if let Some(genre) = &meta.genre {
        for subject in genre.split('/').map(str::trim).filter(|s| !s.is_empty()) {
            opf.push_str(&format!("    <dc:subject>{}</dc:subject>\n", escape_xml(subject)));
        }
    }
    if let Some(date) = iso_date(meta.published.as_deref()) {
        opf.push_str(&format!(
            "    <dc:date opf:event=\"publication\">{date}</dc:date>\n"
        ));
    }
    if let Some(date) = iso_date(meta.updated.as_deref()) {
        opf.push_str(&format!(
            "    <dc:date opf:event=\"modification\">{date}</dc:date>\n"
        ));
    }
    if plan.iter().any(|item| item.role == ItemRole::CoverImage) {
        opf.push_str("    <meta name=\"cover\" content=\"cover-image\"/>\n");
    }
    opf.push_str("  </metadata>\n  <manifest>\n");
    for item in plan {
        opf.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
            escape_attr(&item.id),
            escape_attr(&item.href),
            item.media_type
        ));
    }
    opf.push_str("  </manifest>\n  <spine toc=\"ncx\">\n");
    for item in plan.iter().filter(|item| item.in_spine()) {
        opf.push_str(&format!("    <itemref idref=\"{}\"/>\n", escape_attr(&item.id)));
    }
    opf.push_str("  </spine>\n  <guide>\n");
    for item in plan {
        let (kind, title) = match item.role {
            ItemRole::CoverPage => ("cover", "Cover"),
            ItemRole::TitlePage => ("title-page", "Title Page"),
            ItemRole::TocPage => ("toc", "Table of Contents"),
            ItemRole::Chapter(1) => ("text", "Beginning"),
            _ => continue,
        };
        opf.push_str(&format!(
            "    <reference type=\"{kind}\" title=\"{title}\" href=\"{}\"/>\n",
            escape_attr(&item.href)
        ));
    }
    opf.push_str("  </guide>\n</package>\n");
    opf
}

fn render_ncx(meta: &StoryMetadata, plan: &[PackageItem]) -> String {
    let mut ncx = String::new();
    ncx.push_str(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE ncx PUBLIC "-//NISO//DTD ncx 2005-1//EN" "http://www.daisy.org/z3986/2005/ncx-2005-1.dtd">
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
"#,
    );
    ncx.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"{}\"/>\n",
        escape_attr(&book_identifier(meta))
    ));
    ncx.push_str(
        r#"    <meta name="dtb:depth" content="1"/>
    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
"#,
    );
    ncx.push_str(&format!(
        "  <docTitle><text>{}</text></docTitle>\n",
        escape_xml(&meta.title)
    ));
    ncx.push_str(&format!(
        "  <docAuthor><text>{}</text></docAuthor>\n  <navMap>\n",
        escape_xml(&meta.author)
    ));
    for (order, item) in plan.iter().filter(|item| item.in_spine()).enumerate() {
        let label = item.nav_label.as_deref().unwrap_or_default();
        ncx.push_str(&format!(
            "    <navPoint id=\"nav-{}\" playOrder=\"{}\">\n      <navLabel><text>{}</text></navLabel>\n      <content src=\"{}\"/>\n    </navPoint>\n",
            escape_attr(&item.id),
            order + 1,
            escape_xml(label),
            escape_attr(&item.href)
        ));
    }
    ncx.push_str("  </navMap>\n</ncx>\n");
    ncx
}

fn xhtml_page(title: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <title>{}</title>
  <link rel="stylesheet" type="text/css" href="stylesheet.css"/>
</head>
<body>
{}
</body>
</html>
"#,
        escape_xml(title),
        body
    )
}

fn render_cover_page(image_href: &str) -> String {
    xhtml_page(
        "Cover",
        &format!(
            "<div class=\"cover\"><img src=\"{}\" alt=\"Cover\"/></div>",
            escape_attr(image_href)
        ),
    )
}

fn render_title_page(meta: &StoryMetadata) -> String {
    let mut body = String::new();
    body.push_str(&format!("<h1>{}</h1>\n", escape_xml(&meta.title)));
    match &meta.author_url {
        Some(url) => body.push_str(&format!(
            "<h2>by <a href=\"{}\">{}</a></h2>\n",
            escape_attr(url),
            escape_xml(&meta.author)
        )),
        None => body.push_str(&format!("<h2>by {}</h2>\n", escape_xml(&meta.author))),
    }
    if !meta.description.is_empty() {
        body.push_str(&format!("<p>{}</p>\n", escape_xml(&meta.description)));
    }

    let status = match meta.status {
        StoryStatus::Complete => "Complete",
        StoryStatus::InProgress => "In progress",
    };
    let details: [(&str, Option<&str>); 14] = [
        ("Story ID", Some(meta.id.as_str())),
        ("Source", Some(meta.source_label.as_str()).filter(|s| !s.is_empty())),
        ("URL", Some(meta.canonical_url.as_str()).filter(|s| !s.is_empty())),
        ("Rating", meta.rating.as_deref()),
        ("Language", meta.language.as_deref()),
        ("Genre", meta.genre.as_deref()),
        ("Characters", meta.characters.as_deref()),
        ("Words", meta.word_count.as_deref()),
        ("Reviews", meta.review_count.as_deref()),
        ("Favorites", meta.fav_count.as_deref()),
        ("Follows", meta.follow_count.as_deref()),
        ("Published", meta.published.as_deref()),
        ("Updated", meta.updated.as_deref()),
        ("Status", Some(status)),
    ];
    body.push_str("<dl class=\"details\">\n");
    for (label, value) in details {
        if let Some(value) = value {
            body.push_str(&format!(
                "  <dt>{label}</dt><dd>{}</dd>\n",
                escape_xml(value)
            ));
        }
    }
    body.push_str("</dl>");
    xhtml_page(&meta.title, &body)
}

fn render_toc_page(units: &[ContentUnit]) -> String {
    let mut body = String::from("<h1>Table of Contents</h1>\n<ol>\n");
    for unit in units {
        body.push_str(&format!(
            "  <li><a href=\"{}\">{}</a></li>\n",
            chapter_filename(unit.sequence),
            escape_xml(&unit.label)
        ));
    }
    body.push_str("</ol>");
    xhtml_page("Table of Contents", &body)
}

fn render_chapter(unit: &ContentUnit) -> String {
    let content = match (&unit.raw_content, unit.is_fetched()) {
        (Some(content), true) => content.clone(),
        _ => format!("<p class=\"missing\">{PLACEHOLDER_TEXT}</p>"),
    };
    xhtml_page(
        &unit.label,
        &format!("<h2>{}</h2>\n{}", escape_xml(&unit.label), content),
    )
}

fn language_code(language: Option<&str>) -> &'static str {
    match language.unwrap_or_default() {
        "Chinese" => "zh",
        "Dutch" => "nl",
        "French" => "fr",
        "German" => "de",
        "Indonesian" => "id",
        "Italian" => "it",
        "Japanese" => "ja",
        "Korean" => "ko",
        "Polish" => "pl",
        "Portuguese" => "pt",
        "Russian" => "ru",
        "Spanish" => "es",
        "Swedish" => "sv",
        "Turkish" => "tr",
        "Vietnamese" => "vi",
        _ => "en",
    }
}
