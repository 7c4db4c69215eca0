// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use thiserror::Error;

use crate::builder::DockerBuilder;
use crate::pipeline::Pipeline;
use crate::platform::{CtfdClient, PlatformError};
use crate::source::GitSource;
use crate::sync::Synchronizer;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable {0} must be set")]
    Missing(&'static str),
    #[error("Environment variable {key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct DeployerConfig {
    pub ctfd_uri: String,
    pub ctfd_token: String,
    pub git_url: String,
    pub git_branch: String,
    pub work_dir: PathBuf,
    pub tag_prefix: String,
    pub activation_offset: FixedOffset,
    pub activation_check: Duration,
    /// Periodic run interval, disabled when unset.
    pub deploy_interval: Option<Duration>,
}

pub fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<String, ConfigError> {
    lookup(key)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))
}

pub fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key).filter(|v| !v.is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(None),
    }
}

impl DeployerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let offset_minutes: i32 = parsed(&lookup, "ACTIVATION_UTC_OFFSET_MINUTES")?.unwrap_or(0);
        let activation_offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError::Invalid {
                key: "ACTIVATION_UTC_OFFSET_MINUTES",
                value: offset_minutes.to_string(),
            })?;
        let activation_check: u64 = parsed(&lookup, "ACTIVATION_CHECK_SECS")?.unwrap_or(60);
        if activation_check == 0 {
            return Err(ConfigError::Invalid {
                key: "ACTIVATION_CHECK_SECS",
                value: "0".into(),
            });
        }
        Ok(Self {
            ctfd_uri: required(&lookup, "CTFD_URI")?,
            ctfd_token: required(&lookup, "CTFD_TOKEN")?,
            git_url: required(&lookup, "GIT_URL")?,
            git_branch: lookup("GIT_BRANCH").unwrap_or_else(|| "main".into()),
            work_dir: PathBuf::from(lookup("WORK_DIR").unwrap_or_else(|| ".".into())),
            tag_prefix: lookup("TAG_PREFIX").unwrap_or_else(|| "ctfdx".into()),
            activation_offset,
            activation_check: Duration::from_secs(activation_check),
            deploy_interval: parsed::<u64>(&lookup, "DEPLOY_INTERVAL_SECS")?
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        })
    }

    /// Wires the git source, CTFd client and docker builder into a pipeline.
    pub fn pipeline(&self) -> Result<Pipeline, PlatformError> {
        let platform = CtfdClient::new(&self.ctfd_uri, &self.ctfd_token)?;
        Ok(Pipeline::new(
            Arc::new(GitSource {
                url: self.git_url.clone(),
                branch: self.git_branch.clone(),
            }),
            Synchronizer::new(
                Arc::new(platform),
                Arc::new(DockerBuilder::default()),
                self.tag_prefix.clone(),
            ),
            &self.work_dir,
            self.activation_offset,
        ))
    }
}
