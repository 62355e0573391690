use chrono::{DateTime, TimeZone};

/// Replaces filesystem-unsafe characters (`/ \ ? % * : | " < >`) with `-`.
pub fn sanitize_filename(input: &str) -> String {
    let cleaned: String = input
        .trim()
        .chars()
        .map(|c| if is_forbidden(c) { '-' } else { c })
        .collect();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

/// `<title>.<ext>` with the title made filesystem safe.
pub fn package_filename(title: &str, extension: &str) -> String {
    format!("{}.{extension}", sanitize_filename(title))
}

/// `prefix_YYYY-MM-DD-HH-mm-ss.zip`
pub fn archive_filename<Tz>(prefix: &str, at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}_{}.zip",
        sanitize_filename(prefix),
        at.format("%Y-%m-%d-%H-%M-%S")
    )
}

/// Flat-archive entry name for one unit; the sequence prefix keeps names unique.
pub fn entry_filename(sequence: u32, label: &str, suffix: &str) -> String {
    let mut label = sanitize_filename(label);
    if label.chars().count() > 80 {
        label = label.chars().take(80).collect();
    }
    format!("{sequence:03}_{label}{suffix}")
}

fn is_forbidden(c: char) -> bool {
    matches!(
        c,
        '/' | '\\' | '?' | '%' | '*' | ':' | '|' | '"' | '<' | '>' | '\0'..='\u{1F}'
    )
}
