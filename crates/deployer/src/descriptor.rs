// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Line-oriented `KEY=VALUE` challenge descriptors (`.ctfdx.cfg`).

use std::path::Path;

use indexmap::IndexMap;
use thiserror::Error;

/// File name of the descriptor inside every challenge directory.
pub const DESCRIPTOR_FILE_NAME: &str = ".ctfdx.cfg";

const DENIED_KEYS: [&str; 2] = ["__proto__", "prototype"];
const LIST_DELIMITER: char = ',';

pub mod keys {
    pub const FLAG: &str = "FLAG";
    pub const REDACTED_FILE: &str = "REDACTED_FILE";
    pub const SAFE_FLAG_FILE: &str = "SAFE_FLAG_FILE";
    pub const REPLACE_FLAG: &str = "REPLACE_FLAG";
    pub const REMOVE_README: &str = "REMOVE_README";
    pub const POST_FILE_FOR_USER: &str = "POST_FILE_FOR_USER";
    pub const CHALLENGE_NAME: &str = "CHALLENGE_NAME";
    pub const CHALLENGE_MESSAGE: &str = "CHALLENGE_MESSAGE";
    pub const CHALLENGE_CATEGORY: &str = "CHALLENGE_CATEGORY";
    pub const CHALLENGE_STATE: &str = "CHALLENGE_STATE";
    pub const CHALLENGE_TYPE: &str = "CHALLENGE_TYPE";
    pub const CHALLENGE_TAGS: &str = "CHALLENGE_TAGS";
    pub const CHALLENGE_DIFFICULTY: &str = "CHALLENGE_DIFFICULTY";
    pub const CHALLENGE_SCORE: &str = "CHALLENGE_SCORE";
    pub const DECAYED_MINIMUM: &str = "DECAYED_MINIMUM";
    pub const DECAY_VALUE: &str = "DECAY_VALUE";
    pub const DECAY_LIMIT: &str = "DECAY_LIMIT";
    pub const DECAY_FUNCTION: &str = "DECAY_FUNCTION";
    pub const DOCKER_LOCATION: &str = "DOCKER_LOCATION";
    pub const DOCKER_CONNECT_TYPE: &str = "DOCKER_CONNECT_TYPE";
    pub const DOCKER_PORT: &str = "DOCKER_PORT";
    pub const DOCKER_COMMAND: &str = "DOCKER_COMMAND";
    pub const RELEASE_TIME: &str = "RELEASE_TIME";
}

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("Failed to read descriptor: {0}")]
    Io(#[from] std::io::Error),
    #[error("Descriptor is missing required key {0}")]
    MissingKey(&'static str),
    #[error("Descriptor key {key} is not a valid number: {value}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("Activation time {0:?} does not match YYYY-MM-DDThh:mm")]
    InvalidActivationTime(String),
    #[error("Unknown challenge difficulty {0:?}")]
    UnknownDifficulty(String),
}

/// Parsed descriptor. Values are kept as written; list splitting happens on access.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    entries: IndexMap<String, String>,
}

impl Descriptor {
    /// Loads the descriptor at `path`.
    ///
    /// Returns `Ok(None)` when the file does not exist: the directory is not a
    /// deployable challenge and callers skip it.
    pub fn load(path: &Path) -> Result<Option<Self>, DescriptorError> {
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(Self::parse(&content)))
    }

    pub fn parse(content: &str) -> Self {
        let normalized = content.replace('\r', "");
        let mut entries = IndexMap::new();
        for line in normalized.split('\n') {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            if DENIED_KEYS.contains(&key) {
                continue;
            }
            entries.insert(key.to_string(), value.to_string());
        }
        Self { entries }
    }

    /// Scalar value of `key`. Missing and empty values are both `None`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Value of `key` split on `,`. A value without a delimiter yields a single item.
    pub fn get_list(&self, key: &str) -> Option<Vec<String>> {
        self.get(key)
            .map(|v| v.split(LIST_DELIMITER).map(str::to_string).collect())
    }

    /// `true` only when the value is literally `true` (case-insensitive).
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn get_u32(&self, key: &'static str) -> Result<Option<u32>, DescriptorError> {
        self.get(key)
            .map(|v| {
                v.trim().parse::<u32>().map_err(|_| DescriptorError::InvalidNumber {
                    key,
                    value: v.to_string(),
                })
            })
            .transpose()
    }

    pub fn require(&self, key: &'static str) -> Result<&str, DescriptorError> {
        self.get(key).ok_or(DescriptorError::MissingKey(key))
    }

    pub fn flag(&self) -> Result<&str, DescriptorError> {
        self.require(keys::FLAG)
    }
}
