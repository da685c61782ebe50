// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;
use crate::error::EnumerateError;

/// One file of the source tree as it will appear on the card.
///
/// `size` is captured once at enumeration and never refreshed. A file that
/// changes during the session is reported by the device as a mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub local_path: PathBuf,
    /// Forward-slash separated, relative to the source folder
    pub relative_path: String,
    pub size: u32,
}

impl FileEntry {
    /// A single file sent outside a folder sync. The wire path defaults to
    /// the file name.
    pub fn from_file(local_path: &Path, relative_path: Option<&str>) -> Result<Self, EnumerateError> {
        let meta = std::fs::metadata(local_path).map_err(|source| EnumerateError::Metadata {
            path: local_path.to_path_buf(),
            source,
        })?;
        if !meta.is_file() {
            return Err(EnumerateError::NotAFile(local_path.to_path_buf()));
        }

        let relative_path = match relative_path {
            Some(p) => p.replace('\\', "/"),
            None => local_path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| EnumerateError::NonUtf8(local_path.to_path_buf()))?
                .to_string(),
        };
        if relative_path.split('/').all(str::is_empty) {
            return Err(EnumerateError::EmptyPath(local_path.to_path_buf()));
        }

        Ok(FileEntry {
            local_path: local_path.to_path_buf(),
            relative_path,
            size: wire_size(local_path, meta.len())?,
        })
    }
}

fn wire_size(path: &Path, len: u64) -> Result<u32, EnumerateError> {
    u32::try_from(len).map_err(|_| EnumerateError::TooLarge {
        path: path.to_path_buf(),
        size: len,
    })
}

fn wire_path(root: &Path, path: &Path) -> Result<String, EnumerateError> {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let mut parts = Vec::new();
    for component in rel.components() {
        if let Component::Normal(part) = component {
            let part = part
                .to_str()
                .ok_or_else(|| EnumerateError::NonUtf8(path.to_path_buf()))?;
            parts.push(part);
        }
    }
    Ok(parts.join("/"))
}

/// Every regular file under `root`, including linked files, in a stable
/// name-sorted walk order. Anything else that is not a directory is skipped
/// with a warning.
pub fn enumerate(root: &Path) -> Result<Vec<FileEntry>, EnumerateError> {
    if !root.is_dir() {
        return Err(EnumerateError::NotADirectory(root.to_path_buf()));
    }

    let mut entries = Vec::new();
    let mut seen = HashSet::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }

        // Linked files are followed, linked directories are not descended
        let len = if file_type.is_symlink() {
            match std::fs::metadata(entry.path()) {
                Ok(meta) if meta.is_file() => meta.len(),
                Ok(_) => {
                    log::warn!("Skipping {}: links to a directory", entry.path().display());
                    continue;
                }
                Err(e) => {
                    log::warn!("Skipping {}: broken link ({})", entry.path().display(), e);
                    continue;
                }
            }
        } else if file_type.is_file() {
            entry.metadata()?.len()
        } else {
            log::warn!("Skipping {}: not a regular file", entry.path().display());
            continue;
        };

        let relative_path = wire_path(root, entry.path())?;
        let size = wire_size(entry.path(), len)?;

        if !seen.insert(relative_path.clone()) {
            return Err(EnumerateError::Duplicate(relative_path));
        }

        log::trace!("{} ({} bytes)", relative_path, size);
        entries.push(FileEntry {
            local_path: entry.into_path(),
            relative_path,
            size,
        });
    }

    log::debug!("Found {} files under {}", entries.len(), root.display());
    Ok(entries)
}

// ============================================================================
// Tests
// ============================================================================
