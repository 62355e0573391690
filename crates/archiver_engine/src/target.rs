use url::Url;

use crate::config::SiteConfig;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("no story id or url given")]
    Empty,
    #[error("invalid url {0:?}: {1}")]
    InvalidUrl(String, String),
    #[error("no story id found in {0:?}")]
    Unrecognized(String),
}

/// A story to export, normalized to start at chapter 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryTarget {
    pub id: String,
    pub canonical_url: String,
    origin: Url,
    story_path: String,
}

impl StoryTarget {
    /// Accepts a bare numeric id or a story url pointing at any chapter.
    pub fn parse(input: &str, site: &SiteConfig) -> Result<Self, TargetError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TargetError::Empty);
        }
        if input.chars().all(|c| c.is_ascii_digit()) {
            let origin = parse_url(&site.base_url)?;
            return Self::from_parts(input.to_string(), origin, site, None);
        }

        let url = parse_url(input)?;
        let segments: Vec<String> = url
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let Some(pos) = segments
            .windows(2)
            .position(|pair| pair[0] == "s" && is_numeric(&pair[1]))
        else {
            return Err(TargetError::Unrecognized(input.to_string()));
        };

        let id = segments[pos + 1].clone();
        let mut rewritten = segments;
        match rewritten.get(pos + 2) {
            Some(chapter) if is_numeric(chapter) => rewritten[pos + 2] = "1".to_string(),
            _ => rewritten.insert(pos + 2, "1".to_string()),
        }
        let mut canonical = url.clone();
        canonical.set_path(&format!("/{}/", rewritten.join("/").trim_end_matches('/')));
        canonical.set_query(None);
        canonical.set_fragment(None);

        Self::from_parts(id, url, site, Some(canonical.to_string()))
    }

    fn from_parts(
        id: String,
        origin: Url,
        site: &SiteConfig,
        canonical_url: Option<String>,
    ) -> Result<Self, TargetError> {
        let mut target = Self {
            id,
            canonical_url: String::new(),
            origin,
            story_path: site.story_path.clone(),
        };
        target.canonical_url = match canonical_url {
            Some(url) => url,
            None => target.chapter_url(1)?,
        };
        Ok(target)
    }

    /// Absolute url of chapter `chapter`, on the same host as the target.
    pub fn chapter_url(&self, chapter: u32) -> Result<String, TargetError> {
        let path = self
            .story_path
            .replace("{id}", &self.id)
            .replace("{chapter}", &chapter.to_string());
        self.origin
            .join(&path)
            .map(String::from)
            .map_err(|err| TargetError::InvalidUrl(path, err.to_string()))
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }
}

/// Absolute url for a site-relative template with an `{id}` placeholder.
pub fn document_url(site: &SiteConfig, template: &str, id: &str) -> Result<String, TargetError> {
    let base = parse_url(&site.base_url)?;
    let path = template.replace("{id}", id);
    base.join(&path)
        .map(String::from)
        .map_err(|err| TargetError::InvalidUrl(path, err.to_string()))
}

/// Resolves a possibly relative or protocol-relative reference against `base`.
pub fn resolve_reference(base: &Url, reference: &str) -> Option<String> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return None;
    }
    base.join(trimmed).ok().map(String::from)
}

fn parse_url(raw: &str) -> Result<Url, TargetError> {
    Url::parse(raw).map_err(|err| TargetError::InvalidUrl(raw.to_string(), err.to_string()))
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
}
