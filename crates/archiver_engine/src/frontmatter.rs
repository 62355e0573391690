/// Markdown document for a single exported unit: a front-matter header, a
/// heading, and the converted body.
pub fn build_markdown_document(
    title: &str,
    source_url: &str,
    fetched_utc: &str,
    body_markdown: &str,
) -> String {
    format!(
        "---\ntitle: {title}\nsource: {source_url}\nfetched_utc: {fetched_utc}\n---\n\n# {title}\n\n{body}\n",
        title = title.replace('\n', " "),
        source_url = source_url,
        fetched_utc = fetched_utc,
        body = body_markdown.trim_end(),
    )
}

#[cfg(test)]
mod tests {
    use super::build_markdown_document;

    #[test]
    fn header_precedes_body() {
        let doc = build_markdown_document(
            "Notes",
            "https://example.net/docs/edit.php?docid=5",
            "2024-01-01T00:00:00Z",
            "hello\n\n",
        );
        assert!(doc.starts_with("---\ntitle: Notes\n"));
        assert!(doc.contains("source: https://example.net/docs/edit.php?docid=5\n"));
        assert!(doc.ends_with("---\n\n# Notes\n\nhello\n"));
    }
}
