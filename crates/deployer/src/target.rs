// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::fmt;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

/// Durable key linking a challenge directory to its remote record.
///
/// Derived from the directory *name*: renaming a directory yields a new identity
/// and therefore a new remote record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn of_name(name: &str) -> Self {
        let digest = Sha1::digest(name.as_bytes());
        Self(format!("{digest:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tag value stored on the remote record, `<prefix>_<hash>`.
    pub fn tag(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.0)
    }

    pub fn image_tag(&self) -> String {
        format!("{}:latest", self.0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One challenge directory below the source root.
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub source_dir: PathBuf,
    pub identity: Identity,
}

impl Target {
    pub fn new(source_dir: PathBuf) -> Option<Self> {
        let name = source_dir.file_name()?.to_string_lossy().into_owned();
        Some(Self {
            identity: Identity::of_name(&name),
            name,
            source_dir,
        })
    }

    /// Immediate subdirectories of `root`, sorted by name.
    pub fn discover(root: &Path) -> std::io::Result<Vec<Target>> {
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs.into_iter().filter_map(Target::new).collect())
    }

    pub fn archive_file_name(&self) -> String {
        format!("{}.tar.gz", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_sha1_of_name() {
        let id = Identity::of_name("abc");
        assert_eq!(id.as_str(), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(id.tag("ctfdx"), "ctfdx_a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(id.image_tag(), "a9993e364706816aba3e25717850c26c9cd0d89d:latest");
    }

    #[test]
    fn test_rename_changes_identity() {
        assert_ne!(Identity::of_name("web-1"), Identity::of_name("web-01"));
        assert_eq!(Identity::of_name("web-1"), Identity::of_name("web-1"));
    }

    #[test]
    fn test_discover_lists_only_directories_in_order() {
        let root = tempfile::tempdir().unwrap();
        for name in ["pwn", "crypto", "web"] {
            std::fs::create_dir(root.path().join(name)).unwrap();
        }
        std::fs::write(root.path().join("README.md"), "top level").unwrap();
        let names: Vec<_> = Target::discover(root.path())
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["crypto", "pwn", "web"]);
    }
}
