//! In-memory stand-ins for the remote API and the clone tool.

use crate::harvest::traits::{CloneError, CloneTool};
use crate::model::{EntryKind, TreeEntry};
use crate::traits::{ApiError, TreeApi};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub fn file_entry(path: &str, download_url: &str) -> TreeEntry {
    TreeEntry {
        kind: EntryKind::File,
        path: path.to_string(),
        download_url: Some(download_url.to_string()),
        child_tree_url: None,
    }
}

pub fn dir_entry(path: &str, listing_url: &str) -> TreeEntry {
    TreeEntry {
        kind: EntryKind::Dir,
        path: path.to_string(),
        download_url: None,
        child_tree_url: Some(listing_url.to_string()),
    }
}

#[derive(Default)]
pub struct FakeTree {
    listings: HashMap<String, Vec<TreeEntry>>,
    bodies: HashMap<String, Vec<u8>>,
    pub list_calls: AtomicUsize,
}

impl FakeTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing(mut self, url: &str, entries: Vec<TreeEntry>) -> Self {
        self.listings.insert(url.to_string(), entries);
        self
    }

    pub fn with_body(mut self, url: &str, body: &[u8]) -> Self {
        self.bodies.insert(url.to_string(), body.to_vec());
        self
    }
}

#[async_trait]
impl TreeApi for FakeTree {
    async fn list(&self, url: &str) -> Result<Vec<TreeEntry>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.listings.get(url).cloned().ok_or_else(|| ApiError::Status {
            url: url.to_string(),
            status: 404,
        })
    }

    async fn download(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ApiError> {
        let body = self.bodies.get(url).ok_or_else(|| ApiError::Status {
            url: url.to_string(),
            status: 404,
        })?;
        for chunk in body.chunks(1024) {
            sink.write_all(chunk).await?;
        }
        Ok(body.len() as u64)
    }
}

/// Scripted clone tool: fails the first `failures` clone calls for a URL,
/// then writes a small working tree.
#[derive(Default)]
pub struct FakeGit {
    failures: HashMap<String, u32>,
    branches: Vec<String>,
    submodules: bool,
    panic_on: Option<String>,
    latency: Duration,
    pub clone_calls: Mutex<Vec<(String, PathBuf)>>,
    pub checkouts: Mutex<Vec<String>>,
    pub submodule_syncs: AtomicUsize,
}

impl FakeGit {
    pub fn new() -> Self {
        Self {
            branches: vec!["main".to_string()],
            ..Self::default()
        }
    }

    pub fn failing(mut self, url: &str, times: u32) -> Self {
        self.failures.insert(url.to_string(), times);
        self
    }

    pub fn with_branches(mut self, branches: &[&str]) -> Self {
        self.branches = branches.iter().map(|b| b.to_string()).collect();
        self
    }

    pub fn with_submodules(mut self) -> Self {
        self.submodules = true;
        self
    }

    /// Blocks inside `clone_repo` after the working tree has been created.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn panicking_on(mut self, url: &str) -> Self {
        self.panic_on = Some(url.to_string());
        self
    }

    pub fn clone_count(&self, url: &str) -> usize {
        self.clone_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .count()
    }
}

impl CloneTool for FakeGit {
    fn clone_repo(&self, url: &str, dir: &Path) -> Result<(), CloneError> {
        let attempt = {
            let mut calls = self.clone_calls.lock().unwrap();
            calls.push((url.to_string(), dir.to_path_buf()));
            calls.iter().filter(|(u, _)| u == url).count() as u32
        };
        if self.panic_on.as_deref() == Some(url) {
            panic!("clone tool crashed");
        }

        // Leave debris behind like an interrupted clone would.
        std::fs::create_dir_all(dir.join(".git")).map_err(CloneError::Spawn)?;
        std::thread::sleep(self.latency);
        if attempt <= self.failures.get(url).copied().unwrap_or(0) {
            return Err(CloneError::ToolFailed {
                command: format!("git clone {}", url),
                code: Some(128),
                stderr: "fatal: early EOF".to_string(),
            });
        }

        std::fs::write(dir.join("README.md"), b"fake").map_err(CloneError::Spawn)?;
        if self.submodules {
            std::fs::write(dir.join(".gitmodules"), b"[submodule \"x\"]")
                .map_err(CloneError::Spawn)?;
        }
        Ok(())
    }

    fn checkout_branch(&self, _dir: &Path, branch: &str) -> Result<(), CloneError> {
        self.checkouts.lock().unwrap().push(branch.to_string());
        if self.branches.iter().any(|b| b == branch) {
            Ok(())
        } else {
            Err(CloneError::ToolFailed {
                command: format!("git checkout {}", branch),
                code: Some(1),
                stderr: format!("error: pathspec '{}' did not match", branch),
            })
        }
    }

    fn sync_submodules(&self, _dir: &Path) -> Result<(), CloneError> {
        self.submodule_syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
