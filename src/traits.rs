use crate::model::TreeEntry;
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWrite;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Failed to decode response: {0}")]
    Decode(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Non-OK statuses are the only failures the crawler treats as "nothing here".
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("Cannot parse '{0}' as a URL")]
    Unparseable(String),
    #[error("'{url}' has {found} path segments, expected owner/repo")]
    SegmentCount { url: String, found: usize },
    #[error("Path traversal attempt rejected: '{0}'")]
    PathTraversal(String),
}

/// Remote tree-listing API (GitHub's repository contents endpoint).
#[async_trait]
pub trait TreeApi: Send + Sync {
    /// Lists the immediate children of a directory node.
    async fn list(&self, url: &str) -> Result<Vec<TreeEntry>, ApiError>;

    /// Streams the body at `url` into `sink`, returning the number of bytes written.
    async fn download(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ApiError>;
}
