// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Idempotent create-or-update of challenge records keyed by the identity tag.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::builder::{BuildError, ContainerBuilder};
use crate::challenge::{ChallengeKind, ChallengeRecord};
use crate::descriptor::{Descriptor, DescriptorError, keys};
use crate::packager::PackagedTarget;
use crate::platform::{Platform, PlatformError, RemoteChallenge};
use crate::status::{StatusHandle, Step};
use crate::target::Target;
use crate::tree::resolve_within;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error("Docker location {0:?} escapes the challenge directory")]
    InvalidDockerLocation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub challenge_id: i64,
    pub created: bool,
}

pub struct Synchronizer {
    platform: Arc<dyn Platform>,
    builder: Arc<dyn ContainerBuilder>,
    tag_prefix: String,
}

impl Synchronizer {
    pub fn new(
        platform: Arc<dyn Platform>,
        builder: Arc<dyn ContainerBuilder>,
        tag_prefix: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            builder,
            tag_prefix: tag_prefix.into(),
        }
    }

    /// Lists every remote record once per run.
    pub async fn list_existing(&self) -> Result<Vec<RemoteChallenge>, PlatformError> {
        self.platform.list_challenges().await
    }

    /// Builds the record (and container image), upserts it and replaces its file.
    pub async fn sync(
        &self,
        existing: &[RemoteChallenge],
        target: &Target,
        descriptor: &Descriptor,
        packaged: &PackagedTarget,
        status: &StatusHandle,
    ) -> Result<SyncOutcome, SyncError> {
        status.step(Step::BuildingConfiguration);
        let record = ChallengeRecord::from_descriptor(descriptor, target, packaged.readme.as_deref())?;
        if let ChallengeKind::Container { image, .. } = &record.kind {
            let context = match descriptor.get(keys::DOCKER_LOCATION) {
                Some(location) => resolve_within(&target.source_dir, location)
                    .ok_or_else(|| SyncError::InvalidDockerLocation(location.to_string()))?,
                None => target.source_dir.clone(),
            };
            self.builder.build(&context, image).await?;
        }

        status.step(Step::CreatingOrPatching);
        let flag = descriptor.flag()?;
        let extra_tags = descriptor.get_list(keys::CHALLENGE_TAGS).unwrap_or_default();
        let outcome = self
            .upsert(existing, target, &record, flag, &extra_tags)
            .await?;

        status.step(Step::UploadingFile);
        if descriptor.get_bool(keys::POST_FILE_FOR_USER).unwrap_or(true) {
            self.replace_files(
                outcome.challenge_id,
                &packaged.archive,
                &target.archive_file_name(),
            )
            .await?;
        }
        Ok(outcome)
    }

    pub async fn upsert(
        &self,
        existing: &[RemoteChallenge],
        target: &Target,
        record: &ChallengeRecord,
        flag: &str,
        extra_tags: &[String],
    ) -> Result<SyncOutcome, PlatformError> {
        let identity_tag = target.identity.tag(&self.tag_prefix);
        let mut desired_tags = vec![identity_tag.clone()];
        for tag in extra_tags {
            if !desired_tags.contains(tag) {
                desired_tags.push(tag.clone());
            }
        }

        match existing.iter().find(|c| c.has_tag(&identity_tag)) {
            Some(remote) => {
                tracing::info!("Patching challenge {} ({})", remote.id, target.name);
                self.platform.patch_challenge(remote.id, record).await?;
                let flags = self.platform.list_flags(remote.id).await?;
                match flags.first() {
                    Some(existing_flag) => {
                        self.platform
                            .patch_flag(existing_flag.id, remote.id, flag)
                            .await?
                    }
                    None => self.platform.create_flag(remote.id, flag).await?,
                }
                let current_tags = self.platform.list_tags(remote.id).await?;
                for tag in &current_tags {
                    if desired_tags.contains(&tag.value) {
                        continue;
                    }
                    if let Some(tag_id) = tag.id {
                        self.platform.delete_tag(tag_id).await?;
                    }
                }
                for tag in &desired_tags {
                    if !current_tags.iter().any(|t| t.value == *tag) {
                        self.platform.create_tag(remote.id, tag).await?;
                    }
                }
                Ok(SyncOutcome {
                    challenge_id: remote.id,
                    created: false,
                })
            }
            None => {
                tracing::info!("Creating challenge for {}", target.name);
                let challenge_id = self.platform.create_challenge(record).await?;
                for tag in &desired_tags {
                    self.platform.create_tag(challenge_id, tag).await?;
                }
                self.platform.create_flag(challenge_id, flag).await?;
                Ok(SyncOutcome {
                    challenge_id,
                    created: true,
                })
            }
        }
    }

    /// Deletes every attached file, then uploads the new archive.
    pub async fn replace_files(
        &self,
        challenge_id: i64,
        archive: &Path,
        file_name: &str,
    ) -> Result<(), PlatformError> {
        for file in self.platform.list_files(challenge_id).await? {
            self.platform.delete_file(file.id).await?;
        }
        self.platform
            .upload_file(challenge_id, archive, file_name)
            .await
    }
}
