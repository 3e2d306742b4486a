// Citation marker grammar and resolution
// Author: kelexine (https://github.com/kelexine)

use super::accumulator::{PatternFamily, Scan};
use crate::models::upstream::Citation;
use tracing::{debug, warn};

const OPEN: char = '【';
const DAGGER: char = '†';
const CLOSE: char = '】';
const LABELS: [&str; 2] = ["source", "来源"];

/// Markers of the form `【<digits>†source】` (or the `来源` label).
#[derive(Debug, Default, Clone, Copy)]
pub struct CitationMarkers;

impl PatternFamily for CitationMarkers {
    fn trigger(&self, text: &str) -> Option<usize> {
        text.find(OPEN)
    }

    fn scan(&self, buffer: &str) -> Scan {
        let Some(rest) = buffer.strip_prefix(OPEN) else {
            return Scan::Invalid;
        };
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let rest = &rest[digits..];
        if rest.is_empty() {
            return Scan::Partial;
        }
        if digits == 0 {
            return Scan::Invalid;
        }
        let Some(label_part) = rest.strip_prefix(DAGGER) else {
            return Scan::Invalid;
        };

        for label in LABELS {
            match label_part.strip_prefix(label) {
                Some(after) => {
                    if after.is_empty() {
                        return Scan::Partial;
                    }
                    if let Some(tail) = after.strip_prefix(CLOSE) {
                        return Scan::Complete(buffer.len() - tail.len());
                    }
                }
                None if label.starts_with(label_part) => return Scan::Partial,
                None => {}
            }
        }
        Scan::Invalid
    }
}

/// Citation index of a complete marker.
pub fn citation_index(marker: &str) -> Option<i64> {
    let digits: String = marker
        .trim_start_matches(OPEN)
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Rewrites citation markers into reference links using the citation
/// metadata of the current message.
#[derive(Debug, Clone, Copy)]
pub struct CitationResolver {
    reference_output: bool,
}

impl CitationResolver {
    pub fn new(reference_output: bool) -> Self {
        Self { reference_output }
    }

    /// Replacement text for a complete marker. Never returns the raw marker.
    pub fn resolve(&self, marker: &str, citations: &[Citation]) -> String {
        let Some(index) = citation_index(marker) else {
            warn!("Malformed citation marker {:?}", marker);
            return String::new();
        };

        let url = citations.iter().find_map(|citation| {
            let meta = &citation.metadata;
            let idx = meta.extra.as_ref()?.cited_message_idx?;
            (idx == index).then(|| meta.url.clone()).flatten()
        });

        match url {
            Some(url) if self.reference_output => format!("[[{}]({})]", index, url),
            Some(_) => String::new(),
            None => {
                debug!("No citation metadata for index {}", index);
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::upstream::{CitationExtra, CitationMetadata};

    fn citation(idx: i64, url: &str) -> Citation {
        Citation {
            metadata: CitationMetadata {
                url: Some(url.to_string()),
                extra: Some(CitationExtra {
                    cited_message_idx: Some(idx),
                }),
            },
        }
    }

    #[test]
    fn test_scan_complete_markers() {
        assert_eq!(CitationMarkers.scan("【0†source】"), Scan::Complete("【0†source】".len()));
        assert_eq!(CitationMarkers.scan("【12†来源】 tail"), Scan::Complete("【12†来源】".len()));
    }

    #[test]
    fn test_scan_partial_markers() {
        for partial in ["【", "【1", "【12†", "【1†so", "【1†source", "【1†来"] {
            assert_eq!(CitationMarkers.scan(partial), Scan::Partial, "{}", partial);
        }
    }

    #[test]
    fn test_scan_invalid_markers() {
        for invalid in ["【a", "【†source】", "【1x", "【1†sauce】", "【1†source)"] {
            assert_eq!(CitationMarkers.scan(invalid), Scan::Invalid, "{}", invalid);
        }
    }

    #[test]
    fn test_resolve_found() {
        let resolver = CitationResolver::new(true);
        let citations = vec![citation(1, "https://b.example"), citation(0, "https://a.example")];
        assert_eq!(resolver.resolve("【0†source】", &citations), "[[0](https://a.example)]");
    }

    #[test]
    fn test_resolve_disabled_or_missing() {
        let citations = vec![citation(0, "https://a.example")];
        assert_eq!(CitationResolver::new(false).resolve("【0†source】", &citations), "");
        assert_eq!(CitationResolver::new(true).resolve("【5†source】", &citations), "");
        assert_eq!(CitationResolver::new(true).resolve("【0†source】", &[]), "");
    }
}
