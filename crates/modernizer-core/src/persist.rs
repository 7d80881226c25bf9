//! Atomic JSON persistence for control documents (plan, validation report).
//!
//! A document is serialized into a sibling temp file named after the process
//! and a per-process counter, synced with `File::sync_all` and renamed over
//! the destination. Readers see either the old or the new document.

use crate::{ModernizerError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Read and parse a JSON document.
///
/// Returns `None` if the file doesn't exist, or an error if parsing fails.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ModernizerError::io_with_path(e, path)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| ModernizerError::Json {
            message: format!("Failed to parse {}: {}", path.display(), e),
            source: Some(e),
        })
}

/// Write a JSON document atomically, creating missing parent directories.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ModernizerError::io_with_path(e, parent))?;
    }
    let serialized = serde_json::to_vec_pretty(data).map_err(|e| ModernizerError::Json {
        message: format!("Failed to serialize {}: {}", path.display(), e),
        source: Some(e),
    })?;

    let temp_path = temp_path_for(path);
    let written = File::create(&temp_path)
        .and_then(|mut file| {
            file.write_all(&serialized)?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&temp_path, path));
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(ModernizerError::io_with_path(e, path));
    }

    debug!("Wrote {} ({} bytes)", path.display(), serialized.len());
    Ok(())
}

/// `.<name>.<pid>.<n>.tmp` next to `path`.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.{}.{}.tmp", name, process::id(), n))
}
