//! Filesystem catalog.
//!
//! Enumerates every regular file under a scan root into immutable
//! [`FileRecord`]s. Traversal is sorted by file name, so scan order (and
//! therefore every [`FileId`]) is stable across runs on the same tree.
//! Unreadable subtrees are skipped and remembered; only a missing or
//! unreadable root is fatal.

use crate::config::ControlConfig;
use crate::{ModernizerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Arena index of a file: its position in scan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub usize);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One catalogued file. Created once by the scanner and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    /// Absolute path under the scan root.
    pub source_path: PathBuf,
    /// Path relative to the scan root.
    pub relative_path: PathBuf,
    pub file_name: String,
    /// File name without its final extension.
    pub stem: String,
    /// Lowercased extension without the dot; empty when absent.
    pub extension: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Containing folder relative to the scan root; empty for root-level files.
    pub folder: PathBuf,
}

impl FileRecord {
    fn from_parts(
        id: FileId,
        root: &Path,
        relative_path: PathBuf,
        size: u64,
        modified: DateTime<Utc>,
    ) -> Self {
        let file_name = relative_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let (stem, extension) = match file_name.rfind('.') {
            Some(dot) if dot > 0 => (
                file_name[..dot].to_string(),
                file_name[dot + 1..].to_lowercase(),
            ),
            _ => (file_name.clone(), String::new()),
        };
        let folder = relative_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Self {
            id,
            source_path: root.join(&relative_path),
            relative_path,
            file_name,
            stem,
            extension,
            size,
            modified,
            folder,
        }
    }

    /// Folder components from the top down.
    pub fn folder_components(&self) -> Vec<String> {
        self.folder
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect()
    }

    /// Whether the file sits directly in the scan root.
    pub fn is_root_level(&self) -> bool {
        self.folder.as_os_str().is_empty()
    }
}

/// A subtree the scanner could not read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSubtree {
    pub path: PathBuf,
    pub message: String,
}

/// The materialized result of a scan.
#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    root: PathBuf,
    records: Vec<FileRecord>,
    skipped: Vec<SkippedSubtree>,
    #[serde(skip)]
    by_path: HashMap<PathBuf, FileId>,
}

impl Catalog {
    fn new(root: PathBuf, records: Vec<FileRecord>, skipped: Vec<SkippedSubtree>) -> Self {
        let by_path = records
            .iter()
            .map(|r| (r.source_path.clone(), r.id))
            .collect();
        Self {
            root,
            records,
            skipped,
            by_path,
        }
    }

    /// Build a catalog from an in-memory listing of
    /// `(relative path, size, modified)` triples, in scan order.
    pub fn from_listing(
        root: impl Into<PathBuf>,
        listing: impl IntoIterator<Item = (PathBuf, u64, DateTime<Utc>)>,
    ) -> Self {
        let root = root.into();
        let records = listing
            .into_iter()
            .enumerate()
            .map(|(i, (rel, size, modified))| {
                FileRecord::from_parts(FileId(i), &root, rel, size, modified)
            })
            .collect();
        Self::new(root, records, Vec::new())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    pub fn get(&self, id: FileId) -> Option<&FileRecord> {
        self.records.get(id.0)
    }

    pub fn by_source_path(&self, path: &Path) -> Option<&FileRecord> {
        self.by_path.get(path).and_then(|id| self.get(*id))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.iter()
    }

    /// Subtrees that were skipped because they could not be read.
    pub fn skipped(&self) -> &[SkippedSubtree] {
        &self.skipped
    }

    pub fn total_size(&self) -> u64 {
        self.records.iter().map(|r| r.size).sum()
    }
}

/// Walks a scan root.
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
}

impl Scanner {
    /// Create a scanner for an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let metadata = std::fs::metadata(root).map_err(|e| ModernizerError::Access {
            path: root.to_path_buf(),
            message: "scan root is not readable".into(),
            source: Some(e),
        })?;
        if !metadata.is_dir() {
            return Err(ModernizerError::access(root, "scan root is not a directory"));
        }
        let root = root
            .canonicalize()
            .map_err(|e| ModernizerError::io_with_path(e, root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A fresh pass over the tree. Each call restarts from the root.
    ///
    /// Items are records in scan order, or `Access` errors for subtrees
    /// that could not be read.
    pub fn iter(&self) -> ScanIter {
        ScanIter {
            root: self.root.clone(),
            walker: self.walker(),
            next_id: 0,
        }
    }

    /// Materialize the full catalog.
    pub fn scan(&self) -> Result<Catalog> {
        info!("Scanning {}", self.root.display());
        let mut records = Vec::new();
        let mut skipped = Vec::new();

        for item in self.iter() {
            match item {
                Ok(record) => records.push(record),
                Err(ModernizerError::Access { path, message, .. }) => {
                    warn!("Skipping unreadable {}: {}", path.display(), message);
                    skipped.push(SkippedSubtree { path, message });
                }
                Err(other) => return Err(other),
            }
        }

        info!(
            "Catalogued {} files ({} subtrees skipped)",
            records.len(),
            skipped.len()
        );
        Ok(Catalog::new(self.root.clone(), records, skipped))
    }
}

/// Lazy iterator over one traversal. Produced by [`Scanner::iter`].
pub struct ScanIter {
    root: PathBuf,
    walker: walkdir::FilterEntry<walkdir::IntoIter, fn(&walkdir::DirEntry) -> bool>,
    next_id: usize,
}

fn not_control_dir(entry: &walkdir::DirEntry) -> bool {
    !(entry.file_type().is_dir() && entry.file_name() == ControlConfig::CONTROL_DIR_NAME)
}

impl Iterator for ScanIter {
    type Item = Result<FileRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    let message = err.to_string();
                    return Some(Err(ModernizerError::Access {
                        path,
                        message,
                        source: err.into_io_error(),
                    }));
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    return Some(Err(ModernizerError::Access {
                        path: entry.path().to_path_buf(),
                        message: err.to_string(),
                        source: err.into_io_error(),
                    }))
                }
            };
            let modified = match metadata.modified() {
                Ok(t) => DateTime::<Utc>::from(t),
                Err(err) => {
                    return Some(Err(ModernizerError::Access {
                        path: entry.path().to_path_buf(),
                        message: "modification time unavailable".into(),
                        source: Some(err),
                    }))
                }
            };

            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };

            let record = FileRecord::from_parts(
                FileId(self.next_id),
                &self.root,
                relative.to_path_buf(),
                metadata.len(),
                modified,
            );
            self.next_id += 1;
            debug!("Catalogued {}", record.relative_path.display());
            return Some(Ok(record));
        }
    }
}

impl Scanner {
    fn walker(&self) -> walkdir::FilterEntry<walkdir::IntoIter, fn(&walkdir::DirEntry) -> bool> {
        WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(not_control_dir as fn(&walkdir::DirEntry) -> bool)
    }
}
