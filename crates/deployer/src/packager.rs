// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use tar::Builder;
use thiserror::Error;

use crate::descriptor::{DESCRIPTOR_FILE_NAME, Descriptor, DescriptorError, keys};
use crate::scanner::{REDACTION_TOKEN, ScanError, Scanner};
use crate::status::{StatusHandle, Step};
use crate::target::Target;
use crate::tree::{copy_tree, resolve_within, walk_files};

const README_FILE_NAME: &str = "readme.md";

#[derive(Error, Debug)]
pub enum PackageError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("Redacted file path {0:?} escapes the challenge directory")]
    InvalidRedactedPath(String),
    #[error("Failed to redact {0:?}: {1}")]
    Redact(String, #[source] std::io::Error),
    #[error("Failed to walk staged files: {0}")]
    Walk(#[from] ignore::Error),
    #[error("Staged path outside of staging directory: {0}")]
    StripPrefix(#[from] std::path::StripPrefixError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of packaging one target.
#[derive(Debug, Clone)]
pub struct PackagedTarget {
    pub archive: PathBuf,
    /// Contents of the shipped readme after the leak scan. `None` when it was stripped.
    pub readme: Option<String>,
}

/// Stages, sanitizes and compresses challenge directories.
#[derive(Debug, Clone)]
pub struct Packager {
    pub staging_dir: PathBuf,
    pub dist_dir: PathBuf,
}

impl Packager {
    pub fn new(staging_dir: PathBuf, dist_dir: PathBuf) -> Self {
        Self {
            staging_dir,
            dist_dir,
        }
    }

    pub fn archive_path(&self, target: &Target) -> PathBuf {
        self.dist_dir.join(format!("{}.tar.gz", target.identity))
    }

    /// Copies the target into staging, strips the descriptor, redacted files and
    /// the authoring readme, scans for the flag and only then writes the archive.
    pub fn package(
        &self,
        target: &Target,
        descriptor: &Descriptor,
        status: &StatusHandle,
    ) -> Result<PackagedTarget, PackageError> {
        let staged = self.staging_dir.join(&target.name);
        if staged.exists() {
            std::fs::remove_dir_all(&staged)?;
        }
        copy_tree(&target.source_dir, &staged)?;

        status.step(Step::ReplacingRedactedFiles);
        remove_if_exists(&staged.join(DESCRIPTOR_FILE_NAME))?;
        for entry in descriptor.get_list(keys::REDACTED_FILE).unwrap_or_default() {
            let path = staged_path(&staged, &entry)?;
            tracing::debug!("Replacing {} with placeholder", path.display());
            std::fs::write(&path, REDACTION_TOKEN).map_err(|e| PackageError::Redact(entry, e))?;
        }

        if descriptor.get_bool(keys::REMOVE_README).unwrap_or(false) {
            if let Some(path) = find_readme(&staged)? {
                tracing::debug!("Removing authoring readme {}", path.display());
                std::fs::remove_file(&path)?;
            }
        }

        status.step(Step::SearchingFlags);
        let safe_list = descriptor.get_list(keys::SAFE_FLAG_FILE).unwrap_or_default();
        let redact = descriptor.get_bool(keys::REPLACE_FLAG).unwrap_or(false);
        Scanner::new(descriptor.flag()?, &safe_list, redact)?.scan(&staged)?;

        let readme = match find_readme(&staged)? {
            Some(path) => Some(String::from_utf8_lossy(&std::fs::read(&path)?).into_owned()),
            None => None,
        };

        status.step(Step::Compressing);
        let archive = self.archive_path(target);
        std::fs::create_dir_all(&self.dist_dir)?;
        if let Err(e) = write_archive(&staged, &archive) {
            let _ = std::fs::remove_file(&archive);
            return Err(e);
        }
        tracing::info!("Packaged {} into {}", target.name, archive.display());
        Ok(PackagedTarget { archive, readme })
    }
}

fn staged_path(staged: &Path, entry: &str) -> Result<PathBuf, PackageError> {
    if entry.trim_start_matches('/').is_empty() {
        return Err(PackageError::InvalidRedactedPath(entry.to_string()));
    }
    resolve_within(staged, entry).ok_or_else(|| PackageError::InvalidRedactedPath(entry.to_string()))
}

fn find_readme(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file()
            && entry
                .file_name()
                .to_string_lossy()
                .eq_ignore_ascii_case(README_FILE_NAME)
        {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn write_archive(source_dir: &Path, archive_path: &Path) -> Result<(), PackageError> {
    let file = File::create(archive_path)?;
    let mut archive = Builder::new(GzEncoder::new(file, flate2::Compression::default()));
    for path in walk_files(source_dir) {
        let path = path?;
        let relative_path = path.strip_prefix(source_dir)?;
        archive.append_path_with_name(&path, relative_path)?;
    }
    archive.into_inner()?.finish()?;
    Ok(())
}
