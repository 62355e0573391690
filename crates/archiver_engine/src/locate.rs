use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};

/// Semantic regions the export path asks a page for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocatorKey {
    StoryText,
    Title,
    Author,
    Description,
    MetadataLine,
    Timestamps,
    ChapterList,
    CoverImage,
    SourceLabel,
    DocumentText,
    DocumentList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub tag: String,
    pub inner_html: String,
    pub text: String,
    pub attrs: Vec<(String, String)>,
}

impl Located {
    fn from_element(element: ElementRef<'_>) -> Self {
        Self {
            tag: element.value().name().to_ascii_lowercase(),
            inner_html: element.inner_html(),
            text: element.text().collect::<String>().trim().to_string(),
            attrs: element
                .value()
                .attrs()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Markup held by the element. Editor text areas carry their markup as escaped text.
    pub fn markup(&self) -> &str {
        if self.tag == "textarea" {
            &self.text
        } else {
            &self.inner_html
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid selector {selector:?}: {message}")]
pub struct LocatorError {
    pub selector: String,
    pub message: String,
}

/// Finds semantic regions in a fetched page.
pub trait ContentLocator: Send + Sync {
    fn locate_all(&self, html: &str, key: LocatorKey) -> Vec<Located>;

    fn locate(&self, html: &str, key: LocatorKey) -> Option<Located> {
        self.locate_all(html, key).into_iter().next()
    }
}

/// Selector-table locator. Each key maps to a fallback chain of CSS selectors;
/// the first selector with any match supplies the result.
#[derive(Debug, Clone)]
pub struct SelectorLocator {
    table: HashMap<LocatorKey, Vec<Selector>>,
}

const DEFAULT_SELECTORS: &[(LocatorKey, &[&str])] = &[
    (LocatorKey::StoryText, &["#storytext", "#storytextp", "div.storytext"]),
    (
        LocatorKey::Title,
        &["#profile_top b.xcontrast_txt", "#profile_top > b"],
    ),
    (
        LocatorKey::Author,
        &["#profile_top a.xcontrast_txt[href^='/u/']", "#profile_top a[href^='/u/']"],
    ),
    (LocatorKey::Description, &["#profile_top div.xcontrast_txt"]),
    (LocatorKey::MetadataLine, &["#profile_top span.xgray"]),
    (LocatorKey::Timestamps, &["#profile_top span[data-xutime]"]),
    (LocatorKey::ChapterList, &["select#chap_select option"]),
    (LocatorKey::CoverImage, &["#profile_top img.cimage"]),
    (LocatorKey::SourceLabel, &["#pre_story_links a"]),
    (
        LocatorKey::DocumentText,
        &["textarea[name='bio']", "#docs_content", "#storytext"],
    ),
    (LocatorKey::DocumentList, &["a[href*='docid=']"]),
];

impl SelectorLocator {
    pub fn new() -> Self {
        let table = DEFAULT_SELECTORS
            .iter()
            .map(|(key, selectors)| {
                let parsed = selectors
                    .iter()
                    .filter_map(|raw| Selector::parse(raw).ok())
                    .collect();
                (*key, parsed)
            })
            .collect();
        Self { table }
    }

    /// Replaces the selector chain for one key.
    pub fn with_selectors(mut self, key: LocatorKey, selectors: &[&str]) -> Result<Self, LocatorError> {
        let parsed = selectors
            .iter()
            .map(|raw| {
                Selector::parse(raw).map_err(|err| LocatorError {
                    selector: raw.to_string(),
                    message: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.table.insert(key, parsed);
        Ok(self)
    }
}

impl Default for SelectorLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentLocator for SelectorLocator {
    fn locate_all(&self, html: &str, key: LocatorKey) -> Vec<Located> {
        let Some(selectors) = self.table.get(&key) else {
            return Vec::new();
        };
        let doc = Html::parse_document(html);
        selectors
            .iter()
            .map(|sel| doc.select(sel).map(Located::from_element).collect::<Vec<_>>())
            .find(|found| !found.is_empty())
            .unwrap_or_default()
    }
}
