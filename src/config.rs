use crate::harvest::traits::{ExponentialBackoff, FixedDelay, RetryStrategy};
use crate::model::Ecosystem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub github: GithubConfig,
    pub crawl: CrawlConfig,
    pub clone: CloneConfig,
    pub output: OutputConfig,
    /// Candidate list per ecosystem: a local path or an http(s) URL
    pub sources: BTreeMap<Ecosystem, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// Contents API base URL
    pub api_base: String,
    /// Access token; takes precedence over `token_file`
    pub token: Option<String>,
    /// File holding the access token
    pub token_file: Option<PathBuf>,
    pub user_agent: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Concurrent crawls and file downloads
    pub concurrency: usize,
    /// Descend into subdirectories
    pub recursive: bool,
    /// Maximum directory depth when recursive
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneConfig {
    /// Concurrent clones (0 = auto)
    pub concurrency: usize,
    /// Attempts per repository, including the first
    pub retries: u32,
    /// Delay between attempts in seconds (base delay for exponential backoff)
    pub retry_delay_secs: u64,
    pub backoff: Backoff,
    /// Kill a single git invocation after this many seconds
    pub timeout_secs: Option<u64>,
    pub git_program: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root of the harvested tree; each ecosystem gets a subdirectory
    pub root: PathBuf,
    /// Clone outcome log, relative to `root`
    pub outcome_log: PathBuf,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            token: None,
            token_file: None,
            user_agent: concat!("package-harvester/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            concurrency: crate::executor::LISTING_CONCURRENCY,
            recursive: false,
            max_depth: None,
        }
    }
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            retries: 3,
            retry_delay_secs: 4,
            backoff: Backoff::Fixed,
            timeout_secs: None,
            git_program: PathBuf::from("git"),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("harvest"),
            outcome_log: PathBuf::from("clone-outcomes.jsonl"),
        }
    }
}

/// Curated markdown lists used when no source is configured.
pub fn default_source(ecosystem: Ecosystem) -> &'static str {
    match ecosystem {
        Ecosystem::Python => {
            "https://raw.githubusercontent.com/vinta/awesome-python/master/README.md"
        }
        Ecosystem::Rust => {
            "https://raw.githubusercontent.com/rust-unofficial/awesome-rust/main/README.md"
        }
        Ecosystem::Javascript => {
            "https://raw.githubusercontent.com/sorrycc/awesome-javascript/master/README.md"
        }
        Ecosystem::Ruby => {
            "https://raw.githubusercontent.com/markets/awesome-ruby/master/README.md"
        }
        Ecosystem::Php => "https://raw.githubusercontent.com/ziadoz/awesome-php/master/README.md",
    }
}

impl Config {
    /// Loads from `path` if given, else from the user config directory if a
    /// file exists there, else returns defaults. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path
            .map(Path::to_path_buf)
            .or_else(Self::default_path_if_exists)
        {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `<config dir>/package-harvester/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("package-harvester").join("config.toml"))
    }

    fn default_path_if_exists() -> Option<PathBuf> {
        Self::default_path().filter(|p| p.is_file())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.crawl.concurrency == 0 {
            return Err(ConfigError::Invalid("crawl.concurrency must be at least 1".into()));
        }
        if self.clone.retries == 0 {
            return Err(ConfigError::Invalid("clone.retries must be at least 1".into()));
        }
        if self.github.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "github.request_timeout_secs must be at least 1".into(),
            ));
        }
        if self.clone.timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("clone.timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// The token from `explicit` (flag or environment), then `github.token`,
    /// then the contents of `github.token_file`.
    pub fn resolve_token(&self, explicit: Option<&str>) -> Result<Option<String>, ConfigError> {
        let inline = explicit
            .or(self.github.token.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty());
        if let Some(token) = inline {
            return Ok(Some(token.to_string()));
        }
        match &self.github.token_file {
            Some(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
                        path: path.clone(),
                        source,
                    })?;
                let token = content.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            None => Ok(None),
        }
    }

    pub fn source_for(&self, ecosystem: Ecosystem) -> String {
        self.sources
            .get(&ecosystem)
            .cloned()
            .unwrap_or_else(|| default_source(ecosystem).to_string())
    }

    pub fn clone_concurrency(&self) -> usize {
        match self.clone.concurrency {
            0 => crate::executor::clone_concurrency(),
            n => n,
        }
    }

    pub fn retry_strategy(&self) -> Arc<dyn RetryStrategy> {
        let delay = Duration::from_secs(self.clone.retry_delay_secs);
        match self.clone.backoff {
            Backoff::Fixed => Arc::new(FixedDelay {
                attempts: self.clone.retries,
                delay,
            }),
            Backoff::Exponential => Arc::new(ExponentialBackoff {
                attempts: self.clone.retries,
                base: delay,
                max_delay: delay.saturating_mul(16),
            }),
        }
    }

    pub fn outcome_log_path(&self) -> PathBuf {
        self.output.root.join(&self.output.outcome_log)
    }
}
