// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Interface to the external challenge platform.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::challenge::ChallengeRecord;

mod ctfd;
#[cfg(test)]
pub(crate) mod memory;

pub use ctfd::CtfdClient;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{method} {path} returned {status}: {body}")]
    Status {
        method: reqwest::Method,
        path: String,
        status: u16,
        body: String,
    },
    #[error("{method} {path} was rejected by the platform")]
    Rejected { method: reqwest::Method, path: String },
    #[error("Failed to read upload {}: {}", .0.display(), .1)]
    Io(std::path::PathBuf, #[source] std::io::Error),
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteTag {
    #[serde(default)]
    pub id: Option<i64>,
    pub value: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteChallenge {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: Vec<RemoteTag>,
}

impl RemoteChallenge {
    pub fn has_tag(&self, value: &str) -> bool {
        self.tags.iter().any(|t| t.value == value)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteFlag {
    pub id: i64,
    #[serde(default)]
    pub content: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: i64,
    #[serde(default)]
    pub location: String,
}

/// Operations the synchronizer needs from the platform. Every call is a
/// request/response round trip; implementations never batch or reorder writes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Platform: Send + Sync {
    /// All challenge records, including hidden ones, with their tags.
    async fn list_challenges(&self) -> Result<Vec<RemoteChallenge>, PlatformError>;

    async fn create_challenge(&self, record: &ChallengeRecord) -> Result<i64, PlatformError>;

    async fn patch_challenge(
        &self,
        challenge_id: i64,
        record: &ChallengeRecord,
    ) -> Result<(), PlatformError>;

    async fn list_flags(&self, challenge_id: i64) -> Result<Vec<RemoteFlag>, PlatformError>;

    async fn create_flag(&self, challenge_id: i64, content: &str) -> Result<(), PlatformError>;

    async fn patch_flag(
        &self,
        flag_id: i64,
        challenge_id: i64,
        content: &str,
    ) -> Result<(), PlatformError>;

    /// Tags of one record. Unlike the listing, these carry their ids.
    async fn list_tags(&self, challenge_id: i64) -> Result<Vec<RemoteTag>, PlatformError>;

    async fn create_tag(&self, challenge_id: i64, value: &str) -> Result<(), PlatformError>;

    async fn delete_tag(&self, tag_id: i64) -> Result<(), PlatformError>;

    async fn list_files(&self, challenge_id: i64) -> Result<Vec<RemoteFile>, PlatformError>;

    async fn delete_file(&self, file_id: i64) -> Result<(), PlatformError>;

    async fn upload_file(
        &self,
        challenge_id: i64,
        path: &Path,
        file_name: &str,
    ) -> Result<(), PlatformError>;
}
