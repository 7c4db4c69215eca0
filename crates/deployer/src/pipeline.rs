// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use thiserror::Error;

use crate::activation::{DeferredActivation, parse_activation_time};
use crate::descriptor::{DESCRIPTOR_FILE_NAME, Descriptor, DescriptorError, keys};
use crate::packager::{PackageError, Packager};
use crate::platform::{PlatformError, RemoteChallenge};
use crate::scheduler::RunExecutor;
use crate::source::{SourceError, SourceProvider};
use crate::status::{Phase, StatusHandle, Step};
use crate::sync::{SyncError, Synchronizer};
use crate::target::Target;
use crate::tree::recreate_dir;

/// Errors that end processing of a single target. The run continues.
#[derive(Error, Debug)]
pub enum TargetError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Package(#[from] PackageError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("Packaging task failed: {0}")]
    TokioJoin(#[from] tokio::task::JoinError),
}

/// Errors that abort the whole run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Failed to fetch challenge sources")]
    Source(#[from] SourceError),
    #[error("Failed to list existing challenges")]
    Platform(#[from] PlatformError),
    #[error("Failed to prepare work directories")]
    Io(#[from] std::io::Error),
    #[error("Run aborted unexpectedly")]
    Aborted(#[from] tokio::task::JoinError),
}

impl RunError {
    pub fn name(&self) -> &'static str {
        match self {
            RunError::Source(_) => "SourceError",
            RunError::Platform(_) => "PlatformError",
            RunError::Io(_) => "IoError",
            RunError::Aborted(_) => "Aborted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTarget {
    pub target: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub deployed: usize,
    pub elapsed: Duration,
    pub failed: Vec<FailedTarget>,
    pub deferred: Vec<DeferredActivation>,
    /// Directories without a descriptor.
    pub ignored: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TargetOutcome {
    Deployed,
    Ignored,
    Deferred(chrono::DateTime<Utc>),
}

/// Drives one run: fetch, then package and synchronize every target in order.
pub struct Pipeline {
    source: Arc<dyn SourceProvider>,
    synchronizer: Synchronizer,
    packager: Packager,
    repo_dir: PathBuf,
    activation_offset: FixedOffset,
}

impl Pipeline {
    /// Lays out `repo/`, `packaging/` and `for_user/` under `work_dir`.
    pub fn new(
        source: Arc<dyn SourceProvider>,
        synchronizer: Synchronizer,
        work_dir: &Path,
        activation_offset: FixedOffset,
    ) -> Self {
        Self {
            source,
            synchronizer,
            packager: Packager::new(work_dir.join("packaging"), work_dir.join("for_user")),
            repo_dir: work_dir.join("repo"),
            activation_offset,
        }
    }

    pub async fn run(&self, status: &StatusHandle) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        status.phase(Phase::FetchingChallenges);
        self.source.fetch(&self.repo_dir).await?;
        recreate_dir(&self.packager.staging_dir)?;
        recreate_dir(&self.packager.dist_dir)?;
        let targets = Target::discover(&self.repo_dir)?;
        let existing = self.synchronizer.list_existing().await?;
        tracing::info!(
            "Found {} target directories and {} existing challenges",
            targets.len(),
            existing.len()
        );

        let mut summary = RunSummary::default();
        for target in targets {
            status.target(Some(&target.name));
            match self.process(&target, &existing, status).await {
                Ok(TargetOutcome::Deployed) => summary.deployed += 1,
                Ok(TargetOutcome::Ignored) => {
                    tracing::debug!("{} has no {DESCRIPTOR_FILE_NAME}, skipping", target.name);
                    summary.ignored.push(target.name);
                }
                Ok(TargetOutcome::Deferred(at)) => {
                    tracing::info!("{} is held back until {at}", target.name);
                    summary.deferred.push(DeferredActivation {
                        target: target.name,
                        at,
                    });
                }
                Err(err) => {
                    tracing::warn!("Failed to deploy {}: {err}", target.name);
                    summary.failed.push(FailedTarget {
                        target: target.name,
                        reason: err.to_string(),
                    });
                }
            }
        }
        status.target(None);
        summary.elapsed = started.elapsed();
        tracing::info!(
            "Deployed {} challenges in {:.1}s, {} failed",
            summary.deployed,
            summary.elapsed.as_secs_f64(),
            summary.failed.len()
        );
        Ok(summary)
    }

    async fn process(
        &self,
        target: &Target,
        existing: &[RemoteChallenge],
        status: &StatusHandle,
    ) -> Result<TargetOutcome, TargetError> {
        status.step(Step::LoadingConfiguration);
        let Some(descriptor) =
            Descriptor::load(&target.source_dir.join(DESCRIPTOR_FILE_NAME))?
        else {
            return Ok(TargetOutcome::Ignored);
        };
        if let Some(release) = descriptor.get(keys::RELEASE_TIME) {
            let at = parse_activation_time(release, self.activation_offset)?;
            if at > Utc::now() {
                return Ok(TargetOutcome::Deferred(at));
            }
        }

        status.phase(Phase::Packaging);
        let packaged = {
            let packager = self.packager.clone();
            let target = target.clone();
            let descriptor = descriptor.clone();
            let status = status.clone();
            tokio::task::spawn_blocking(move || packager.package(&target, &descriptor, &status))
                .await??
        };

        status.phase(Phase::Uploading);
        let outcome = self
            .synchronizer
            .sync(existing, target, &descriptor, &packaged, status)
            .await?;
        tracing::info!(
            "{} {} as challenge {}",
            if outcome.created { "Created" } else { "Updated" },
            target.name,
            outcome.challenge_id
        );
        Ok(TargetOutcome::Deployed)
    }
}

#[async_trait]
impl RunExecutor for Pipeline {
    async fn execute(&self, status: &StatusHandle) -> Result<RunSummary, RunError> {
        self.run(status).await
    }
}
