// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gix::bstr::BStr;
use gix::remote::fetch::Shallow;
use tempfile::TempDir;
use thiserror::Error;

use crate::tree::copy_tree;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Invalid repository URL: {0}")]
    Url(#[from] gix::url::parse::Error),
    #[error("Invalid branch name: {0}")]
    Branch(#[from] gix::validate::reference::name::Error),
    #[error("Could not start clone: {0}")]
    Clone(#[from] gix::clone::Error),
    #[error("Could not fetch branch: {0}")]
    Fetch(#[from] gix::clone::fetch::Error),
    #[error("Could not check out worktree: {0}")]
    Checkout(#[from] gix::clone::checkout::main_worktree::Error),
    #[error("Clone task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Failed to replace snapshot: {0}")]
    Io(#[from] std::io::Error),
}

/// Supplies the latest snapshot of all challenge directories.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Replaces `root` with a fresh snapshot.
    async fn fetch(&self, root: &Path) -> Result<(), SourceError>;
}

/// Shallow clone of one branch of a git repository.
pub struct GitSource {
    pub url: String,
    pub branch: String,
}

impl GitSource {
    /// Checks out the tip of the branch into `into`, without history.
    async fn shallow_clone(&self, into: PathBuf) -> Result<(), SourceError> {
        let url = gix::Url::from_bytes(BStr::new(&self.url))?;
        let head = format!("refs/heads/{}", self.branch);
        tracing::info!("Fetching {} ({}) into {}", self.url, self.branch, into.display());
        tokio::task::spawn_blocking(move || -> Result<(), SourceError> {
            let interrupt = &gix::interrupt::IS_INTERRUPTED;
            let (mut checkout, _) = gix::prepare_clone(url, into)?
                .with_ref_name(Some(&head))?
                .with_shallow(Shallow::DepthAtRemote(NonZeroU32::MIN))
                .fetch_then_checkout(gix::progress::Discard, interrupt)?;
            checkout.main_worktree(gix::progress::Discard, interrupt)?;
            Ok(())
        })
        .await?
    }
}

/// Removes top-level entries whose name starts with `.` (`.git`, `.github`, ...).
fn remove_dot_entries(root: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[async_trait]
impl SourceProvider for GitSource {
    async fn fetch(&self, root: &Path) -> Result<(), SourceError> {
        let parent = root.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)?;
        // same filesystem as root, so the final move is a rename
        let scratch = TempDir::new_in(parent)?;
        let snapshot = scratch.path().join("repo");
        self.shallow_clone(snapshot.clone()).await?;
        remove_dot_entries(&snapshot)?;
        if root.exists() {
            std::fs::remove_dir_all(root)?;
        }
        if std::fs::rename(&snapshot, root).is_err() {
            copy_tree(&snapshot, root)?;
        }
        Ok(())
    }
}
