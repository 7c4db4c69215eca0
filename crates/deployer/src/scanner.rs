// SPDX-FileCopyrightText: 2025 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Leak scanning of a staged challenge tree.
//!
//! Every file is decoded under each [`Encoding`] and the NFC-normalized text is
//! searched for the NFC-normalized secret. A secret that only surfaces under one
//! decoding (for example inside a UTF-16 string table of a binary) is still a leak.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::tree::walk_files;

pub const REDACTION_TOKEN: &str = "[REDACTED]";

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Unsafe hardcoded flag found in {}", .0.display())]
    Leak(PathBuf),
    #[error("Flag in {} could not be redacted", .0.display())]
    RedactionFailed(PathBuf),
    #[error("Refusing to scan for an empty flag")]
    EmptySecret,
    #[error("Failed to walk {}: {}", .0.display(), .1)]
    Walk(PathBuf, #[source] ignore::Error),
    #[error("IO error on {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),
}

/// Byte-to-text decodings a file is searched under, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// 7-bit: the high bit of every byte is cleared.
    Ascii,
    Utf8,
    Utf16Le,
    /// Like UTF-16LE but without surrogate pairing; every unit maps to one char.
    Ucs2,
    Latin1,
}

impl Encoding {
    pub const ALL: [Encoding; 5] = [
        Encoding::Ascii,
        Encoding::Utf8,
        Encoding::Utf16Le,
        Encoding::Ucs2,
        Encoding::Latin1,
    ];

    pub fn decode<'a>(self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self {
            Encoding::Ascii => Cow::Owned(bytes.iter().map(|b| (b & 0x7f) as char).collect()),
            Encoding::Utf8 => String::from_utf8_lossy(bytes),
            Encoding::Utf16Le => Cow::Owned(String::from_utf16_lossy(&utf16_units(bytes))),
            Encoding::Ucs2 => Cow::Owned(
                utf16_units(bytes)
                    .into_iter()
                    .map(|u| char::from_u32(u as u32).unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect(),
            ),
            Encoding::Latin1 => Cow::Owned(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    /// Encodes `text`, or `None` when it is not representable.
    pub fn encode(self, text: &str) -> Option<Vec<u8>> {
        match self {
            Encoding::Ascii => text
                .chars()
                .map(|c| c.is_ascii().then_some(c as u8))
                .collect(),
            Encoding::Utf8 => Some(text.as_bytes().to_vec()),
            Encoding::Utf16Le => Some(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            Encoding::Ucs2 => text
                .chars()
                .map(|c| u16::try_from(c as u32).ok().map(u16::to_le_bytes))
                .collect::<Option<Vec<_>>>()
                .map(|units| units.concat()),
            Encoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(c as u32).ok())
                .collect(),
        }
    }
}

fn utf16_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Loose safe-list match: after stripping one leading and one trailing `/` from
/// `entry`, the path is safe when its full textual form contains the entry.
///
/// This is a substring test, not a glob. `flag` marks `src/flag.txt` and
/// `/tmp/flags/x` as safe alike.
///
/// Exception to the substring rule: an entry that is empty after stripping
/// (`""`, `/`, `//`) would contain-match every path and switch the scan off,
/// so it matches nothing.
pub fn is_safe_path(path: &Path, entry: &str) -> bool {
    let entry = entry.strip_prefix('/').unwrap_or(entry);
    let entry = entry.strip_suffix('/').unwrap_or(entry);
    !entry.is_empty() && path.to_string_lossy().contains(entry)
}

pub struct Scanner<'a> {
    secret: String,
    safe_list: &'a [String],
    redact: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(secret: &str, safe_list: &'a [String], redact: bool) -> Result<Self, ScanError> {
        if secret.is_empty() {
            return Err(ScanError::EmptySecret);
        }
        Ok(Self {
            secret: secret.nfc().collect(),
            safe_list,
            redact,
        })
    }

    /// Scans every file below `dir`. Stops at the first leak unless redacting.
    pub fn scan(&self, dir: &Path) -> Result<(), ScanError> {
        for path in walk_files(dir) {
            let path = path.map_err(|e| ScanError::Walk(dir.to_path_buf(), e))?;
            if self.safe_list.iter().any(|safe| is_safe_path(&path, safe)) {
                tracing::debug!("Skipping safe-listed file {}", path.display());
                continue;
            }
            self.scan_file(&path)?;
        }
        Ok(())
    }

    fn scan_file(&self, path: &Path) -> Result<(), ScanError> {
        let original = std::fs::read(path).map_err(|e| ScanError::Io(path.to_path_buf(), e))?;
        let mut bytes = original.clone();
        for encoding in Encoding::ALL {
            if !self.leaks(&bytes, encoding) {
                continue;
            }
            if !self.redact {
                return Err(ScanError::Leak(path.to_path_buf()));
            }
            tracing::info!("Redacting flag in {} ({:?})", path.display(), encoding);
            bytes = self.redact_bytes(&bytes, encoding);
        }
        if bytes != original {
            if Encoding::ALL.iter().any(|&e| self.leaks(&bytes, e)) {
                return Err(ScanError::RedactionFailed(path.to_path_buf()));
            }
            std::fs::write(path, &bytes).map_err(|e| ScanError::Io(path.to_path_buf(), e))?;
        }
        Ok(())
    }

    fn leaks(&self, bytes: &[u8], encoding: Encoding) -> bool {
        let decoded: String = encoding.decode(bytes).nfc().collect();
        decoded.contains(&self.secret)
    }

    /// Replaces the encoded secret at byte level so the rest of the file is left
    /// untouched. Falls back to rewriting the whole decoded text when the secret
    /// only matches after normalization.
    fn redact_bytes(&self, bytes: &[u8], encoding: Encoding) -> Vec<u8> {
        let mut out = bytes.to_vec();
        if let (Some(needle), Some(token)) = (
            encoding.encode(&self.secret),
            encoding.encode(REDACTION_TOKEN),
        ) {
            out = replace_bytes(&out, &needle, &token);
            let nfd: String = self.secret.nfd().collect();
            if let Some(needle) = encoding.encode(&nfd) {
                out = replace_bytes(&out, &needle, &token);
            }
        }
        if !self.leaks(&out, encoding) {
            return out;
        }
        let text: String = encoding.decode(&out).nfc().collect();
        let replaced = text.replace(&self.secret, REDACTION_TOKEN);
        encoding
            .encode(&replaced)
            .unwrap_or_else(|| replaced.into_bytes())
    }
}

fn replace_bytes(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    if needle.is_empty() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            out.extend_from_slice(replacement);
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}
