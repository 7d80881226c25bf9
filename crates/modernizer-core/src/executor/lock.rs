//! Exclusive run lock on the target root.

use crate::config::ControlConfig;
use crate::{ModernizerError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Holds `.modernizer/migration.lock` for the lifetime of a run.
///
/// The lock is released and the lock file removed on drop.
#[derive(Debug)]
pub struct TargetLock {
    file: File,
    path: PathBuf,
}

impl TargetLock {
    /// Take the lock, creating the control directory if needed.
    ///
    /// Fails with `TargetLocked` if another run holds it.
    pub fn acquire(control_dir: &Path) -> Result<Self> {
        fs::create_dir_all(control_dir)
            .map_err(|e| ModernizerError::io_with_path(e, control_dir))?;
        let path = control_dir.join(ControlConfig::LOCK_FILENAME);

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| ModernizerError::io_with_path(e, &path))?;

        if file.try_lock_exclusive().is_err() {
            return Err(ModernizerError::TargetLocked {
                path: control_dir.parent().unwrap_or(control_dir).to_path_buf(),
            });
        }

        file.set_len(0)
            .and_then(|_| writeln!(file, "{}", std::process::id()))
            .map_err(|e| ModernizerError::io_with_path(e, &path))?;
        debug!("Acquired run lock {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TargetLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("Lock file {} not removed: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_lock_is_refused() {
        let temp = TempDir::new().unwrap();
        let control = temp.path().join(".modernizer");

        let lock = TargetLock::acquire(&control).unwrap();
        assert!(lock.path().exists());
        assert!(matches!(
            TargetLock::acquire(&control),
            Err(ModernizerError::TargetLocked { .. })
        ));

        drop(lock);
        assert!(!control.join(ControlConfig::LOCK_FILENAME).exists());
        assert!(TargetLock::acquire(&control).is_ok());
    }
}
