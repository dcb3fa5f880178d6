use crate::traits::ReferenceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use url::Url;

/// A normalized `owner/repo` pointer on the forge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryReference {
    pub owner: String,
    pub name: String,
    pub canonical_url: String,
}

impl RepositoryReference {
    /// Normalizes a raw repository URL.
    ///
    /// Query string and fragment are dropped, duplicate separators collapse,
    /// and a trailing separator is ignored. Exactly two non-empty path
    /// segments must remain.
    pub fn parse(raw: &str) -> Result<Self, ReferenceError> {
        let trimmed = raw.trim();
        let unparseable = || ReferenceError::Unparseable(trimmed.to_string());
        let url = Url::parse(trimmed).map_err(|_| unparseable())?;
        let host = url.host_str().ok_or_else(unparseable)?;

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        if segments.len() != 2 {
            return Err(ReferenceError::SegmentCount {
                url: trimmed.to_string(),
                found: segments.len(),
            });
        }

        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let (owner, name) = (segments[0].to_string(), segments[1].to_string());
        let canonical_url = format!("{}://{}/{}/{}", url.scheme(), authority, owner, name);

        Ok(Self {
            owner,
            name,
            canonical_url,
        })
    }

    /// Root listing URL under the contents API.
    pub fn contents_url(&self, api_base: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents",
            api_base.trim_end_matches('/'),
            self.owner,
            self.name
        )
    }

    /// `owner/repo`, the per-repository partition of an output directory.
    pub fn relative_dir(&self) -> PathBuf {
        Path::new(&self.owner).join(&self.name)
    }
}

impl fmt::Display for RepositoryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    /// Symlinks and submodules; never followed.
    #[serde(other)]
    Other,
}

/// One child in a tree listing, as returned by the contents API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub download_url: Option<String>,
    /// Link to this entry's own listing.
    #[serde(rename = "url", default)]
    pub child_tree_url: Option<String>,
}

/// A file download resolved to a location under the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTarget {
    pub remote_url: String,
    pub local_relative_path: PathBuf,
}

impl FileTarget {
    /// Derives the local path from the percent-decoded URL path.
    ///
    /// For raw content URLs this yields `owner/repo/<ref>/<path>`. Any `..`
    /// component is rejected so a hostile URL cannot escape the output root.
    pub fn from_download_url(remote_url: &str) -> Result<Self, ReferenceError> {
        let unparseable = || ReferenceError::Unparseable(remote_url.to_string());
        let url = Url::parse(remote_url).map_err(|_| unparseable())?;
        let decoded = percent_encoding::percent_decode_str(url.path())
            .decode_utf8()
            .map_err(|_| unparseable())?;

        let mut local = PathBuf::new();
        for part in decoded.split('/').filter(|p| !p.is_empty()) {
            match Path::new(part).components().next() {
                Some(Component::Normal(_)) => local.push(part),
                _ => return Err(ReferenceError::PathTraversal(decoded.to_string())),
            }
        }

        if local.file_name().is_none() {
            return Err(ReferenceError::SegmentCount {
                url: remote_url.to_string(),
                found: 0,
            });
        }

        Ok(Self {
            remote_url: remote_url.to_string(),
            local_relative_path: local,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Cloned,
    AlreadyExists,
    Terminating,
    Malformed,
    Exhausted,
    Unexpected,
}

/// Terminal record for one repository retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneOutcome {
    pub source_url: String,
    pub repository: Option<RepositoryReference>,
    pub kind: OutcomeKind,
    pub success: bool,
    pub message: String,
    pub attempts_used: u32,
}

impl CloneOutcome {
    pub fn new(
        source_url: &str,
        repository: Option<RepositoryReference>,
        kind: OutcomeKind,
        message: impl Into<String>,
        attempts_used: u32,
    ) -> Self {
        Self {
            source_url: source_url.to_string(),
            repository,
            success: kind == OutcomeKind::Cloned,
            kind,
            message: message.into(),
            attempts_used,
        }
    }
}

/// A package environment recognized by its manifest/lockfile names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Python,
    Rust,
    Javascript,
    Ruby,
    Php,
}

impl Ecosystem {
    pub const ALL: [Ecosystem; 5] = [
        Ecosystem::Python,
        Ecosystem::Rust,
        Ecosystem::Javascript,
        Ecosystem::Ruby,
        Ecosystem::Php,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Ecosystem::Python => "python",
            Ecosystem::Rust => "rust",
            Ecosystem::Javascript => "javascript",
            Ecosystem::Ruby => "ruby",
            Ecosystem::Php => "php",
        }
    }

    /// Lockfile first, then the project manifest, then extras.
    pub fn file_names(&self) -> &'static [&'static str] {
        match self {
            Ecosystem::Python => &["poetry.lock", "pyproject.toml"],
            Ecosystem::Rust => &["Cargo.lock", "Cargo.toml"],
            Ecosystem::Javascript => &["package-lock.json", "package.json"],
            Ecosystem::Ruby => &["Gemfile.lock", "Gemfile", ".gemspec"],
            Ecosystem::Php => &["composer.lock", "composer.json"],
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Ecosystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ecosystem::ALL
            .into_iter()
            .find(|e| e.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown ecosystem '{}' (expected python, rust, javascript, ruby, php or all)",
                    s
                )
            })
    }
}

/// One ecosystem, or every known one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcosystemSelection {
    All,
    One(Ecosystem),
}

impl EcosystemSelection {
    pub fn ecosystems(&self) -> Vec<Ecosystem> {
        match self {
            EcosystemSelection::All => Ecosystem::ALL.to_vec(),
            EcosystemSelection::One(e) => vec![*e],
        }
    }
}

impl FromStr for EcosystemSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(EcosystemSelection::All)
        } else {
            s.parse().map(EcosystemSelection::One)
        }
    }
}

/// How accepted repositories are retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Download only the matched manifest/lockfiles.
    Files,
    /// Clone every repository with at least one match.
    Clone,
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalMode::Files => f.write_str("files"),
            RetrievalMode::Clone => f.write_str("clone"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_normalization() {
        let r = RepositoryReference::parse("https://github.com//owner/repo/?tab=readme#start")
            .unwrap();
        assert_eq!(r.canonical_url, "https://github.com/owner/repo");
        assert_eq!(r.owner, "owner");
        assert_eq!(r.name, "repo");
        assert_eq!(r.relative_dir(), PathBuf::from("owner/repo"));
    }

    #[test]
    fn test_reference_rejects_wrong_segment_count() {
        assert!(matches!(
            RepositoryReference::parse("https://github.com/owner"),
            Err(ReferenceError::SegmentCount { found: 1, .. })
        ));
        assert!(matches!(
            RepositoryReference::parse("https://github.com/owner/repo/tree/main"),
            Err(ReferenceError::SegmentCount { found: 4, .. })
        ));
        assert!(matches!(
            RepositoryReference::parse("not a url"),
            Err(ReferenceError::Unparseable(_))
        ));
    }

    #[test]
    fn test_contents_url() {
        let r = RepositoryReference::parse("https://github.com/rust-lang/cargo").unwrap();
        assert_eq!(
            r.contents_url("https://api.github.com/"),
            "https://api.github.com/repos/rust-lang/cargo/contents"
        );
    }

    #[test]
    fn test_tree_entry_deserialization() {
        let json = r#"[
            {
                "type": "file",
                "path": "Cargo.toml",
                "download_url": "https://raw.example/o/r/main/Cargo.toml",
                "url": "https://api.example/x"
            },
            {"type": "dir", "path": "src", "download_url": null, "url": "https://api.example/src"},
            {"type": "symlink", "path": "link", "url": "https://api.example/link"}
        ]"#;
        let entries: Vec<TreeEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[1].kind, EntryKind::Dir);
        assert_eq!(entries[1].download_url, None);
        assert_eq!(entries[2].kind, EntryKind::Other);
    }

    #[test]
    fn test_file_target_decodes_path() {
        let t = FileTarget::from_download_url(
            "https://raw.githubusercontent.com/owner/repo/main/my%20dir/Cargo.lock",
        )
        .unwrap();
        assert_eq!(
            t.local_relative_path,
            PathBuf::from("owner/repo/main/my dir/Cargo.lock")
        );
    }

    #[test]
    fn test_file_target_rejects_traversal() {
        let err =
            FileTarget::from_download_url("https://raw.example/owner/repo/..%2F..%2Fetc/passwd")
                .unwrap_err();
        assert!(matches!(err, ReferenceError::PathTraversal(_)));
    }

    #[test]
    fn test_ecosystem_parsing() {
        assert_eq!("Rust".parse::<Ecosystem>().unwrap(), Ecosystem::Rust);
        assert_eq!(
            "ALL".parse::<EcosystemSelection>().unwrap(),
            EcosystemSelection::All
        );
        assert_eq!(EcosystemSelection::All.ecosystems().len(), 5);
        assert!("cobol".parse::<Ecosystem>().is_err());
    }

    #[test]
    fn test_outcome_success_follows_kind() {
        let ok = CloneOutcome::new("u", None, OutcomeKind::Cloned, "cloned", 1);
        assert!(ok.success);
        let skip = CloneOutcome::new(
            "u",
            None,
            OutcomeKind::AlreadyExists,
            "already exists",
            0,
        );
        assert!(!skip.success);
    }
}
