//! Read-only file storage backing a module
//!
//! Paths are always relative, `/`-separated, and normalized.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{ModuleError, Result};

/// Source of a module's raw files
pub trait ReadBucket: Send + Sync {
    /// All file paths in the bucket, sorted
    fn paths(&self) -> Result<Vec<String>>;

    /// Read the full content of one file
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Where the file lives outside the bucket (e.g. on disk), if anywhere
    fn external_path(&self, _path: &str) -> Option<String> {
        None
    }
}

/// Bucket held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryBucket {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(path, content)` pairs
    pub fn from_files<P, C, I>(files: I) -> Self
    where
        P: Into<String>,
        C: Into<Vec<u8>>,
        I: IntoIterator<Item = (P, C)>,
    {
        Self {
            files: files
                .into_iter()
                .map(|(path, content)| {
                    let path: String = path.into();
                    (normalize_path(&path), content.into())
                })
                .collect(),
        }
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        let path: String = path.into();
        self.files.insert(normalize_path(&path), content.into());
    }
}

impl ReadBucket for MemoryBucket {
    fn paths(&self) -> Result<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| ModuleError::FileNotFound(path.to_string()))
    }
}

/// Bucket over a directory on disk
#[derive(Debug, Clone)]
pub struct DirBucket {
    root: PathBuf,
    skip_prefixes: Vec<String>,
}

impl DirBucket {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            skip_prefixes: [".git/", "target/", "node_modules/"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ReadBucket for DirBucket {
    fn paths(&self) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = entry.map_err(|e| match e.into_io_error() {
                Some(io) => ModuleError::from(io),
                None => ModuleError::internal("directory walk failed without an IO error"),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let relative = normalize_path(&relative.to_string_lossy());
            if self.skip_prefixes.iter().any(|p| relative.starts_with(p)) {
                continue;
            }
            paths.push(relative);
        }
        paths.sort();
        Ok(paths)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.root.join(path);
        match fs::read(&full) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ModuleError::FileNotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn external_path(&self, path: &str) -> Option<String> {
        Some(self.root.join(path).to_string_lossy().to_string())
    }
}

/// Normalize to a relative `/`-separated path without `.` or `..` segments
pub fn normalize_path(path: &str) -> String {
    let mut components: Vec<&str> = Vec::new();
    for part in path.split(&['/', '\\'][..]) {
        match part {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            part => components.push(part),
        }
    }
    components.join("/")
}
