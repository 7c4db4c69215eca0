// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory platform used by tests that need state across calls.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Platform, PlatformError, RemoteChallenge, RemoteFile, RemoteFlag, RemoteTag};
use crate::challenge::ChallengeRecord;

#[derive(Debug, Clone)]
pub struct StoredChallenge {
    pub record: ChallengeRecord,
    pub tags: Vec<RemoteTag>,
    pub flags: Vec<RemoteFlag>,
    pub files: Vec<(RemoteFile, String)>,
}

#[derive(Default)]
pub struct MemoryPlatform {
    pub challenges: Mutex<BTreeMap<i64, StoredChallenge>>,
    next_id: Mutex<i64>,
    /// Every call in order, e.g. `patch_challenge 1`.
    pub calls: Mutex<Vec<String>>,
}

impl MemoryPlatform {
    fn id(&self) -> i64 {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        *next
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn not_found(path: String) -> PlatformError {
        PlatformError::Status {
            method: reqwest::Method::GET,
            path,
            status: 404,
            body: String::new(),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<i64, StoredChallenge> {
        self.challenges.lock().unwrap().clone()
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    async fn list_challenges(&self) -> Result<Vec<RemoteChallenge>, PlatformError> {
        self.log("list_challenges".into());
        Ok(self
            .challenges
            .lock()
            .unwrap()
            .iter()
            .map(|(id, c)| RemoteChallenge {
                id: *id,
                name: c.record.name.clone(),
                tags: c
                    .tags
                    .iter()
                    .map(|t| RemoteTag {
                        id: None,
                        value: t.value.clone(),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn create_challenge(&self, record: &ChallengeRecord) -> Result<i64, PlatformError> {
        let id = self.id();
        self.log(format!("create_challenge {id}"));
        self.challenges.lock().unwrap().insert(
            id,
            StoredChallenge {
                record: record.clone(),
                tags: vec![],
                flags: vec![],
                files: vec![],
            },
        );
        Ok(id)
    }

    async fn patch_challenge(
        &self,
        challenge_id: i64,
        record: &ChallengeRecord,
    ) -> Result<(), PlatformError> {
        self.log(format!("patch_challenge {challenge_id}"));
        let mut challenges = self.challenges.lock().unwrap();
        let stored = challenges
            .get_mut(&challenge_id)
            .ok_or_else(|| Self::not_found(format!("/challenges/{challenge_id}")))?;
        stored.record = record.clone();
        Ok(())
    }

    async fn list_flags(&self, challenge_id: i64) -> Result<Vec<RemoteFlag>, PlatformError> {
        self.log(format!("list_flags {challenge_id}"));
        Ok(self
            .challenges
            .lock()
            .unwrap()
            .get(&challenge_id)
            .map(|c| c.flags.clone())
            .unwrap_or_default())
    }

    async fn create_flag(&self, challenge_id: i64, content: &str) -> Result<(), PlatformError> {
        let id = self.id();
        self.log(format!("create_flag {challenge_id}"));
        let mut challenges = self.challenges.lock().unwrap();
        let stored = challenges
            .get_mut(&challenge_id)
            .ok_or_else(|| Self::not_found("/flags".into()))?;
        stored.flags.push(RemoteFlag {
            id,
            content: content.to_string(),
        });
        Ok(())
    }

    async fn patch_flag(
        &self,
        flag_id: i64,
        challenge_id: i64,
        content: &str,
    ) -> Result<(), PlatformError> {
        self.log(format!("patch_flag {flag_id}"));
        let mut challenges = self.challenges.lock().unwrap();
        let flag = challenges
            .get_mut(&challenge_id)
            .and_then(|c| c.flags.iter_mut().find(|f| f.id == flag_id))
            .ok_or_else(|| Self::not_found(format!("/flags/{flag_id}")))?;
        flag.content = content.to_string();
        Ok(())
    }

    async fn list_tags(&self, challenge_id: i64) -> Result<Vec<RemoteTag>, PlatformError> {
        self.log(format!("list_tags {challenge_id}"));
        Ok(self
            .challenges
            .lock()
            .unwrap()
            .get(&challenge_id)
            .map(|c| c.tags.clone())
            .unwrap_or_default())
    }

    async fn create_tag(&self, challenge_id: i64, value: &str) -> Result<(), PlatformError> {
        let id = self.id();
        self.log(format!("create_tag {challenge_id} {value}"));
        let mut challenges = self.challenges.lock().unwrap();
        let stored = challenges
            .get_mut(&challenge_id)
            .ok_or_else(|| Self::not_found("/tags".into()))?;
        stored.tags.push(RemoteTag {
            id: Some(id),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn delete_tag(&self, tag_id: i64) -> Result<(), PlatformError> {
        self.log(format!("delete_tag {tag_id}"));
        for stored in self.challenges.lock().unwrap().values_mut() {
            stored.tags.retain(|t| t.id != Some(tag_id));
        }
        Ok(())
    }

    async fn list_files(&self, challenge_id: i64) -> Result<Vec<RemoteFile>, PlatformError> {
        self.log(format!("list_files {challenge_id}"));
        Ok(self
            .challenges
            .lock()
            .unwrap()
            .get(&challenge_id)
            .map(|c| c.files.iter().map(|(f, _)| f.clone()).collect())
            .unwrap_or_default())
    }

    async fn delete_file(&self, file_id: i64) -> Result<(), PlatformError> {
        self.log(format!("delete_file {file_id}"));
        for stored in self.challenges.lock().unwrap().values_mut() {
            stored.files.retain(|(f, _)| f.id != file_id);
        }
        Ok(())
    }

    async fn upload_file(
        &self,
        challenge_id: i64,
        path: &Path,
        file_name: &str,
    ) -> Result<(), PlatformError> {
        let id = self.id();
        self.log(format!("upload_file {challenge_id} {file_name}"));
        if !path.is_file() {
            return Err(PlatformError::Io(
                path.to_path_buf(),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }
        let mut challenges = self.challenges.lock().unwrap();
        let stored = challenges
            .get_mut(&challenge_id)
            .ok_or_else(|| Self::not_found("/files".into()))?;
        stored.files.push((
            RemoteFile {
                id,
                location: format!("{id}/{file_name}"),
            },
            file_name.to_string(),
        ));
        Ok(())
    }
}
