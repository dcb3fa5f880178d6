//! File-mode retrieval: stream one remote file into the output tree.

use crate::context::RunContext;
use crate::model::FileTarget;
use crate::traits::{ApiError, TreeApi};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug)]
pub enum DownloadStatus {
    Written { path: PathBuf, bytes: u64 },
    /// Not attempted because the run is shutting down.
    Skipped { url: String },
    Failed { url: String, reason: String },
}

/// Downloads are not retried; re-running the whole phase is cheap.
pub struct FileDownloader<A: TreeApi> {
    api: Arc<A>,
    ctx: Arc<RunContext>,
    output_dir: PathBuf,
}

impl<A: TreeApi> FileDownloader<A> {
    pub fn new(api: Arc<A>, ctx: Arc<RunContext>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            api,
            ctx,
            output_dir: output_dir.into(),
        }
    }

    /// Streams `remote_url` to `output_dir/<decoded url path>`, replacing any
    /// existing file there.
    ///
    /// The body lands in a `.part` sibling first and is renamed into place
    /// once complete, so an interrupted download never leaves a truncated
    /// file at the final path.
    pub async fn fetch(&self, remote_url: &str) -> DownloadStatus {
        let status = if self.ctx.is_cancelled() {
            DownloadStatus::Skipped {
                url: remote_url.to_string(),
            }
        } else {
            match FileTarget::from_download_url(remote_url) {
                Ok(target) => self.fetch_target(&target).await,
                Err(e) => DownloadStatus::Failed {
                    url: remote_url.to_string(),
                    reason: e.to_string(),
                },
            }
        };

        match &status {
            DownloadStatus::Written { path, bytes } => {
                self.ctx.record_success();
                debug!(path = %path.display(), bytes, "Saved file");
            }
            DownloadStatus::Skipped { .. } => self.ctx.record_skip(),
            DownloadStatus::Failed { url, reason } => {
                self.ctx.record_failure();
                warn!(url = %url, reason = %reason, "Failed to download");
            }
        }
        status
    }

    async fn fetch_target(&self, target: &FileTarget) -> DownloadStatus {
        let dest = self.output_dir.join(&target.local_relative_path);
        let partial = partial_path(&dest);
        let failed = |reason: String| DownloadStatus::Failed {
            url: target.remote_url.clone(),
            reason,
        };

        if let Some(parent) = dest.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                return failed(format!("cannot create {}: {}", parent.display(), e));
            }
        }

        let mut file = match fs::File::create(&partial).await {
            Ok(f) => f,
            Err(e) => return failed(format!("cannot create {}: {}", partial.display(), e)),
        };
        let result = match self.api.download(&target.remote_url, &mut file).await {
            Ok(bytes) => file.flush().await.map(|_| bytes).map_err(ApiError::from),
            Err(e) => Err(e),
        };
        drop(file);

        match result {
            Ok(bytes) => match fs::rename(&partial, &dest).await {
                Ok(()) => DownloadStatus::Written { path: dest, bytes },
                Err(e) => {
                    let _ = fs::remove_file(&partial).await;
                    failed(format!("cannot move into place: {}", e))
                }
            },
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                match e.status() {
                    Some(status) => failed(format!("status code {}", status)),
                    None => failed(e.to_string()),
                }
            }
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}
