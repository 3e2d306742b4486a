// Sandbox file reference grammar and link rewriting
// Author: kelexine (https://github.com/kelexine)

use super::accumulator::{PatternFamily, Scan};
use super::artifacts::TurnDeps;
use crate::error::Result;
use chrono::Local;
use tracing::{error, info};

const PREFIX: &str = "(sandbox:";

/// Rendered in place of a reference that could not be resolved.
pub const SANDBOX_ERROR: &str =
    "\n```\nError: sandbox file download failed, the conversation may have history disabled\n```";

/// References of the form `(sandbox:<path>)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SandboxLinks;

impl PatternFamily for SandboxLinks {
    fn trigger(&self, text: &str) -> Option<usize> {
        text.find('(')
    }

    fn scan(&self, buffer: &str) -> Scan {
        let Some(path) = buffer.strip_prefix(PREFIX) else {
            return if PREFIX.starts_with(buffer) {
                Scan::Partial
            } else {
                Scan::Invalid
            };
        };
        match path.find(|c: char| c == ')' || c == '\n') {
            None => Scan::Partial,
            Some(0) => Scan::Invalid,
            Some(end) if path[end..].starts_with(')') => Scan::Complete(PREFIX.len() + end + 1),
            Some(_) => Scan::Invalid,
        }
    }
}

/// Sandbox path inside a complete reference.
pub fn sandbox_path(marker: &str) -> &str {
    marker
        .strip_prefix(PREFIX)
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or_default()
}

/// File name announced by a sandbox download URL.
///
/// The name travels in the `rscd` query parameter as
/// `attachment; filename=<percent-encoded name>`. Falls back to the last
/// segment of the sandbox path.
pub fn download_filename(download_url: &str, sandbox_path: &str) -> String {
    let from_url = reqwest::Url::parse(download_url).ok().and_then(|url| {
        url.query_pairs()
            .find(|(key, _)| key == "rscd")
            .and_then(|(_, value)| value.rsplit("filename=").next().map(str::to_string))
    });

    let raw = from_url
        .map(|name| {
            urlencoding::decode(&name)
                .map(|n| n.into_owned())
                .unwrap_or(name)
        })
        .map(|name| name.trim().trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| {
            sandbox_path
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string()
        });

    let cleaned: String = raw
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "download".to_string()
    } else {
        cleaned
    }
}

/// Resolves sandbox references into public links.
pub struct SandboxResolver<'a> {
    deps: &'a TurnDeps,
}

impl<'a> SandboxResolver<'a> {
    pub fn new(deps: &'a TurnDeps) -> Self {
        Self { deps }
    }

    /// Replacement text for a complete reference.
    pub async fn resolve(&self, marker: &str, conversation_id: &str, message_id: &str) -> String {
        match self.try_resolve(marker, conversation_id, message_id).await {
            Ok(link) => link,
            Err(e) => {
                error!("Sandbox file {} could not be resolved: {}", marker, e);
                SANDBOX_ERROR.to_string()
            }
        }
    }

    async fn try_resolve(&self, marker: &str, conversation_id: &str, message_id: &str) -> Result<String> {
        let path = sandbox_path(marker);
        let download_url = self
            .deps
            .artifacts
            .sandbox_download_url(conversation_id, message_id, path)
            .await?;

        if self.deps.output.use_hosted_image_urls {
            return Ok(format!("({})", download_url));
        }

        let name = format!(
            "{}_{}",
            Local::now().format("%Y%m%d%H%M%S"),
            download_filename(&download_url, path)
        );
        let bytes = self.deps.artifacts.fetch(&download_url).await?;
        let public_url = self.deps.store.persist_file(&name, &bytes).await?;
        info!("Sandbox file {} stored as {}", path, name);
        Ok(format!("({})", public_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan() {
        assert_eq!(SandboxLinks.scan("("), Scan::Partial);
        assert_eq!(SandboxLinks.scan("(sand"), Scan::Partial);
        assert_eq!(SandboxLinks.scan("(sandbox:"), Scan::Partial);
        assert_eq!(SandboxLinks.scan("(sandbox:/mnt/data/out.csv"), Scan::Partial);
        assert_eq!(
            SandboxLinks.scan("(sandbox:/mnt/data/out.csv) more"),
            Scan::Complete("(sandbox:/mnt/data/out.csv)".len())
        );
        assert_eq!(SandboxLinks.scan("(see below)"), Scan::Invalid);
        assert_eq!(SandboxLinks.scan("(sandbox:)"), Scan::Invalid);
        assert_eq!(SandboxLinks.scan("(sandbox:/a\nb)"), Scan::Invalid);
    }

    #[test]
    fn test_sandbox_path() {
        assert_eq!(sandbox_path("(sandbox:/mnt/data/out.csv)"), "/mnt/data/out.csv");
    }

    #[test]
    fn test_filename_from_rscd() {
        let url = "https://files.example/abc?se=1&rscd=attachment%3B%20filename%3Dmy%2520report.csv&sig=x";
        assert_eq!(download_filename(url, "/mnt/data/ignored.csv"), "my report.csv");
    }

    #[test]
    fn test_filename_fallback_and_sanitizing() {
        assert_eq!(
            download_filename("https://files.example/abc", "/mnt/data/out.csv"),
            "out.csv"
        );
        assert_eq!(
            download_filename("https://f.example/?rscd=attachment%3B+filename%3D..%2Fx", "/a"),
            ".._x"
        );
        assert_eq!(download_filename("not a url", ""), "download");
    }
}
