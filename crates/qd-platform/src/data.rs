//! Immutable data handles passed to the platform.
//!
//! Content is read once at construction; the handle never re-reads the
//! source path, so later edits on disk do not change what was submitted.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{PlatformError, PlatformResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinglefileData {
    filename: String,
    content: Arc<[u8]>,
    checksum: String,
}

impl SinglefileData {
    pub fn from_bytes(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content: Vec<u8> = content.into();
        let checksum = format!("{:x}", Sha256::digest(&content));
        Self {
            filename: filename.into(),
            content: content.into(),
            checksum,
        }
    }

    pub fn from_path(path: &Path) -> PlatformResult<Self> {
        if !path.is_file() {
            return Err(PlatformError::InputNotFound {
                path: path.to_path_buf(),
            });
        }
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(Self::from_bytes(filename, fs::read(path)?))
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn content_str(&self) -> String {
        String::from_utf8_lossy(&self.content).to_string()
    }

    /// Hex SHA-256 of the content.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn write_to(&self, path: &Path) -> PlatformResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &self.content)?;
        Ok(())
    }
}

/// Files of a directory tree keyed by `/`-separated relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderData {
    files: BTreeMap<String, SinglefileData>,
}

impl FolderData {
    /// Walk `root` recursively, keeping regular files only.
    pub fn from_dir(root: &Path) -> PlatformResult<Self> {
        if !root.is_dir() {
            return Err(PlatformError::InputNotFound {
                path: root.to_path_buf(),
            });
        }
        let mut files = BTreeMap::new();
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.insert(key, SinglefileData::from_path(entry.path())?);
        }
        Ok(Self { files })
    }

    pub fn get(&self, relative: &str) -> Option<&SinglefileData> {
        self.files.get(relative)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Recreate the tree under `dest`, returning the paths written.
    pub fn write_to(&self, dest: &Path) -> PlatformResult<Vec<PathBuf>> {
        fs::create_dir_all(dest)?;
        let mut written = Vec::with_capacity(self.files.len());
        for (relative, file) in &self.files {
            let target = relative.split('/').fold(dest.to_path_buf(), |p, c| p.join(c));
            file.write_to(&target)?;
            written.push(target);
        }
        Ok(written)
    }
}
