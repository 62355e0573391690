use engine_logging::{engine_debug, engine_info};

use crate::metadata::CoverArt;
use crate::Fetcher;

/// Resolution path tokens, smallest first.
pub const DEFAULT_RESOLUTION_TOKENS: &[&str] = &["/75/", "/150/", "/180/"];

/// URLs to try for a cover, in order: every token larger than the one in `url`
/// (largest first), then `url` itself. A URL with no known token yields only itself.
pub fn cover_candidates(url: &str, tokens: &[String]) -> Vec<String> {
    let current = tokens
        .iter()
        .enumerate()
        .find(|(_, token)| url.contains(token.as_str()));

    let mut candidates: Vec<String> = match current {
        Some((index, token)) => tokens[index + 1..]
            .iter()
            .rev()
            .map(|larger| url.replacen(token.as_str(), larger, 1))
            .collect(),
        None => Vec::new(),
    };
    candidates.push(url.to_string());
    candidates
}

/// Fetches the best available cover. Failed candidates are skipped; `None` only
/// when every candidate, including the original URL, failed.
pub async fn probe_cover(fetcher: &dyn Fetcher, url: &str, tokens: &[String]) -> Option<CoverArt> {
    for candidate in cover_candidates(url, tokens) {
        match fetcher.fetch(&candidate).await {
            Ok(output) => {
                engine_info!("Cover resolved from {} ({} bytes)", candidate, output.bytes.len());
                return Some(cover_art(output.bytes));
            }
            Err(err) => engine_debug!("Cover candidate {} failed: {}", candidate, err),
        }
    }
    None
}

/// Wraps image bytes, sniffing the media type from the file signature.
/// Unrecognized signatures are labelled JPEG.
pub fn cover_art(bytes: Vec<u8>) -> CoverArt {
    let (media_type, extension) = sniff_image(&bytes);
    CoverArt {
        bytes,
        media_type,
        extension,
    }
}

fn sniff_image(bytes: &[u8]) -> (&'static str, &'static str) {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        ("image/png", "png")
    } else if bytes.starts_with(b"GIF8") {
        ("image/gif", "gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        ("image/webp", "webp")
    } else {
        ("image/jpeg", "jpg")
    }
}
