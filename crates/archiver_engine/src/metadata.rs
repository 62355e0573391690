use std::sync::LazyLock;

use chrono::DateTime;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoryStatus {
    Complete,
    #[default]
    InProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoryMetadata {
    pub id: String,
    pub title: String,
    pub author: String,
    pub author_url: Option<String>,
    pub description: String,
    pub source_label: String,
    pub canonical_url: String,
    pub cover: Option<CoverArt>,
    pub rating: Option<String>,
    pub language: Option<String>,
    pub genre: Option<String>,
    pub characters: Option<String>,
    pub word_count: Option<String>,
    pub review_count: Option<String>,
    pub fav_count: Option<String>,
    pub follow_count: Option<String>,
    pub updated: Option<String>,
    pub published: Option<String>,
    pub status: StoryStatus,
}

/// Cover image bytes plus the media type sniffed from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverArt {
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
    pub extension: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    Rating,
    WordCount,
    ReviewCount,
    FavCount,
    FollowCount,
    Updated,
    Published,
    Status,
    Characters,
    Language,
    Genre,
}

/// One row of the segment classification table.
///
/// Rules are evaluated in ascending `priority`; the first rule whose predicate
/// accepts a segment claims it. A field keeps the first value it receives.
#[derive(Debug, Clone, Copy)]
pub struct SegmentRule {
    pub priority: u8,
    pub field: MetadataField,
    pub predicate: fn(&str) -> bool,
    pub value: fn(&str) -> String,
}

const KNOWN_LANGUAGES: &[&str] = &[
    "Afrikaans", "Albanian", "Arabic", "Bulgarian", "Catalan", "Chinese", "Croatian", "Czech",
    "Danish", "Dutch", "English", "Esperanto", "Estonian", "Farsi", "Filipino", "Finnish",
    "French", "German", "Greek", "Hebrew", "Hindi", "Hungarian", "Icelandic", "Indonesian",
    "Italian", "Japanese", "Korean", "Latin", "Latvian", "Lithuanian", "Norwegian", "Polish",
    "Portuguese", "Romanian", "Russian", "Serbian", "Slovak", "Slovenian", "Spanish", "Swedish",
    "Tagalog", "Thai", "Turkish", "Ukrainian", "Vietnamese",
];

static SINGLE_CAPITALIZED_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][a-z]+$").expect("static regex"));

macro_rules! labeled {
    ($priority:expr, $field:expr, $label:literal) => {
        SegmentRule {
            priority: $priority,
            field: $field,
            predicate: |seg| seg.starts_with($label),
            value: |seg| seg[$label.len()..].trim().to_string(),
        }
    };
}

pub const SEGMENT_RULES: &[SegmentRule] = &[
    SegmentRule {
        priority: 0,
        field: MetadataField::Rating,
        predicate: |seg| seg.starts_with("Rated:"),
        value: |seg| {
            let rating = seg["Rated:".len()..].trim();
            rating
                .strip_prefix("Fiction")
                .map(str::trim)
                .filter(|rest| !rest.is_empty())
                .unwrap_or(rating)
                .to_string()
        },
    },
    labeled!(1, MetadataField::WordCount, "Words:"),
    labeled!(2, MetadataField::ReviewCount, "Reviews:"),
    labeled!(3, MetadataField::FavCount, "Favs:"),
    labeled!(4, MetadataField::FollowCount, "Follows:"),
    labeled!(5, MetadataField::Updated, "Updated:"),
    labeled!(6, MetadataField::Published, "Published:"),
    SegmentRule {
        priority: 7,
        field: MetadataField::Status,
        predicate: |seg| seg == "Complete",
        value: |seg| seg.to_string(),
    },
    SegmentRule {
        priority: 8,
        field: MetadataField::Characters,
        predicate: |seg| seg.starts_with('['),
        value: |seg| seg.to_string(),
    },
    SegmentRule {
        priority: 9,
        field: MetadataField::Language,
        predicate: |seg| KNOWN_LANGUAGES.contains(&seg),
        value: |seg| seg.to_string(),
    },
    SegmentRule {
        priority: 10,
        field: MetadataField::Genre,
        predicate: |seg| seg.contains('/') || SINGLE_CAPITALIZED_WORD.is_match(seg),
        value: |seg| seg.to_string(),
    },
];

/// Returns the field and value the rule table assigns to one trimmed segment.
pub fn classify_segment(segment: &str) -> Option<(MetadataField, String)> {
    SEGMENT_RULES
        .iter()
        .find(|rule| (rule.predicate)(segment))
        .map(|rule| (rule.field, (rule.value)(segment)))
}

/// Parses a `segment - segment - ...` metadata line, then applies authoritative
/// epoch timestamps: two or more values are `updated` then `published`; a single
/// value is `published`. Authoritative dates replace text-derived ones.
pub fn normalize_metadata(line: &str, timestamps: &[i64]) -> StoryMetadata {
    let mut meta = StoryMetadata::default();
    let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");

    for segment in collapsed.split(" - ").map(str::trim).filter(|s| !s.is_empty()) {
        let Some((field, value)) = classify_segment(segment) else {
            continue;
        };
        let slot = match field {
            MetadataField::Rating => &mut meta.rating,
            MetadataField::WordCount => &mut meta.word_count,
            MetadataField::ReviewCount => &mut meta.review_count,
            MetadataField::FavCount => &mut meta.fav_count,
            MetadataField::FollowCount => &mut meta.follow_count,
            MetadataField::Updated => &mut meta.updated,
            MetadataField::Published => &mut meta.published,
            MetadataField::Characters => &mut meta.characters,
            MetadataField::Language => &mut meta.language,
            MetadataField::Genre => &mut meta.genre,
            MetadataField::Status => {
                meta.status = StoryStatus::Complete;
                continue;
            }
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    apply_timestamps(&mut meta, timestamps);
    meta
}

fn apply_timestamps(meta: &mut StoryMetadata, timestamps: &[i64]) {
    match timestamps {
        [] => {}
        [published] => {
            if let Some(date) = format_epoch(*published) {
                meta.published = Some(date);
            }
        }
        [updated, published, ..] => {
            if let Some(date) = format_epoch(*updated) {
                meta.updated = Some(date);
            }
            if let Some(date) = format_epoch(*published) {
                meta.published = Some(date);
            }
        }
    }
}

fn format_epoch(secs: i64) -> Option<String> {
    DateTime::from_timestamp(secs, 0).map(|dt| dt.format("%Y-%m-%d").to_string())
}
