// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::{Component, Path, PathBuf};

use ignore::WalkBuilder;

/// Depth-first, name-ordered sequence of every regular file below `root`.
///
/// Nothing is filtered: hidden files and ignore files are walked like anything else.
pub fn walk_files(root: &Path) -> impl Iterator<Item = Result<PathBuf, ignore::Error>> {
    WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => entry
                .file_type()
                .is_some_and(|ft| ft.is_file())
                .then(|| Ok(entry.into_path())),
            Err(e) => Some(Err(e)),
        })
}

/// Recreates the directories and regular files of `src` under `dst`.
/// Symlinks and special files are left out.
pub fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let to = dst.join(entry.file_name());
        match entry.file_type()? {
            kind if kind.is_dir() => copy_tree(&entry.path(), &to)?,
            kind if kind.is_file() => {
                std::fs::copy(entry.path(), &to)?;
            }
            _ => tracing::debug!("Not copying {}", entry.path().display()),
        }
    }
    Ok(())
}

/// Resolves a descriptor-supplied path below `root`. Leading slashes are
/// relative to `root`; `..`, prefixes and the like are refused.
pub fn resolve_within(root: &Path, entry: &str) -> Option<PathBuf> {
    let relative = Path::new(entry.trim_start_matches('/'));
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        .then(|| root.join(relative))
}

/// Removes `dir` if present and creates it empty.
pub fn recreate_dir(dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::fs::create_dir_all(dir)
}
