//! Candidate repository lists.
//!
//! A source is either a markdown document (a curated "awesome" list), from
//! which repository links are extracted, or a plain list with one URL per
//! line. Sources may be local files or http(s) URLs.

use crate::client::GithubClient;
use crate::model::RepositoryReference;
use crate::traits::ApiError;
use regex::Regex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: ApiError,
    },
}

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[\s*.*?\s*\]\(\s*(https://github\.com[^\s\)]+)\s*\)")
            .expect("valid link pattern")
    })
}

fn repository_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^https://github\.com/[^/]+/[^/]+/?$").expect("valid repository pattern")
    })
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn is_markdown(location: &str) -> bool {
    is_remote(location) || location.to_ascii_lowercase().ends_with(".md")
}

/// Reads `location` and returns the repository URLs it names, without
/// duplicates, in order of first appearance.
pub async fn load_candidates(
    location: &str,
    client: &GithubClient,
) -> Result<Vec<String>, SourceError> {
    let text = if is_remote(location) {
        client.fetch_text(location).await.map_err(|source| SourceError::Fetch {
            url: location.to_string(),
            source,
        })?
    } else {
        tokio::fs::read_to_string(location)
            .await
            .map_err(|source| SourceError::Read {
                path: PathBuf::from(location),
                source,
            })?
    };

    let urls = if is_markdown(location) {
        extract_repository_links(&text)
    } else {
        parse_url_list(&text)
    };
    let urls = dedupe(urls);
    info!(source = location, candidates = urls.len(), "Loaded candidate repositories");
    Ok(urls)
}

/// Links of the form `[text](https://github.com/owner/repo)`. Links deeper
/// into a repository (issues, blobs) are dropped.
pub fn extract_repository_links(markdown: &str) -> Vec<String> {
    link_pattern()
        .captures_iter(markdown)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|url| repository_pattern().is_match(url))
        .map(str::to_string)
        .collect()
}

/// One URL per line; blank lines and `#` comments are ignored.
pub fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Drops entries naming an already seen repository. Unparseable entries are
/// kept so that later stages can report them.
pub fn dedupe(urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|url| {
            let key = RepositoryReference::parse(url)
                .map(|r| r.canonical_url)
                .unwrap_or_else(|_| url.clone());
            let fresh = seen.insert(key);
            if !fresh {
                debug!(url = %url, "Dropping duplicate candidate");
            }
            fresh
        })
        .collect()
}
