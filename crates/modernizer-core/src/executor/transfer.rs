//! Copy-then-verify file transfer.
//!
//! A transfer streams the source into a staging file next to the
//! destination, fsyncs it, re-reads it with BLAKE3 and compares size and
//! digest with the source before publishing it under the final name. The
//! destination is never overwritten.

use crate::cancel::CancellationToken;
use crate::config::ExecutionConfig;
use crate::{ModernizerError, Result};
use blake3::Hasher as Blake3Hasher;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// What a successful transfer verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub bytes: u64,
    /// BLAKE3 hex digest of the content.
    pub checksum: String,
}

/// The executor's file transfer seam.
///
/// Implementations must leave no file at `destination` unless the content
/// was verified, and must remove `staging` on every failure.
pub trait Transfer: Send + Sync + std::fmt::Debug {
    fn transfer(
        &self,
        source: &Path,
        destination: &Path,
        staging: &Path,
        abort: &CancellationToken,
    ) -> Result<TransferReceipt>;
}

/// Staging path for a destination: `.<name>.<seq>.part` in the same folder.
pub fn staging_path(destination: &Path, sequence: u64) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(
        ".{}.{}{}",
        name,
        sequence,
        ExecutionConfig::STAGING_SUFFIX
    ))
}

/// BLAKE3 hex digest and length of a file.
pub fn hash_file(path: &Path) -> Result<(u64, String)> {
    let mut file = File::open(path).map_err(|e| ModernizerError::io_with_path(e, path))?;
    let mut hasher = Blake3Hasher::new();
    let mut buffer = vec![0u8; ExecutionConfig::COPY_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| ModernizerError::io_with_path(e, path))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }
    Ok((total, hasher.finalize().to_hex().to_string()))
}

/// The production transfer.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifiedCopy;

impl VerifiedCopy {
    /// Stream `source` into a fresh `staging` file and fsync it.
    ///
    /// Returns the length and digest of what was read from the source.
    pub fn stage(
        &self,
        source: &Path,
        staging: &Path,
        abort: &CancellationToken,
    ) -> Result<TransferReceipt> {
        let mut input = File::open(source).map_err(|e| ModernizerError::io_with_path(e, source))?;
        let mut output = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(staging)
            .map_err(|e| ModernizerError::io_with_path(e, staging))?;

        let mut hasher = Blake3Hasher::new();
        let mut buffer = vec![0u8; ExecutionConfig::COPY_CHUNK_SIZE];
        let mut bytes = 0u64;
        loop {
            if abort.is_cancelled() {
                return Err(ModernizerError::Cancelled);
            }
            let read = input
                .read(&mut buffer)
                .map_err(|e| ModernizerError::io_with_path(e, source))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            output
                .write_all(&buffer[..read])
                .map_err(|e| ModernizerError::io_with_path(e, staging))?;
            bytes += read as u64;
        }
        output
            .sync_all()
            .map_err(|e| ModernizerError::io_with_path(e, staging))?;

        Ok(TransferReceipt {
            bytes,
            checksum: hasher.finalize().to_hex().to_string(),
        })
    }

    /// Check the staging file against `expected` and publish it as
    /// `destination`.
    pub fn verify_and_publish(
        &self,
        staging: &Path,
        destination: &Path,
        expected: &TransferReceipt,
        abort: &CancellationToken,
    ) -> Result<TransferReceipt> {
        let (bytes, checksum) = hash_file(staging)?;
        if bytes != expected.bytes {
            return Err(ModernizerError::CopyVerification {
                destination: destination.to_path_buf(),
                message: format!("size mismatch: source {} bytes, copy {} bytes", expected.bytes, bytes),
            });
        }
        if checksum != expected.checksum {
            return Err(ModernizerError::CopyVerification {
                destination: destination.to_path_buf(),
                message: format!(
                    "checksum mismatch: source {}, copy {}",
                    &expected.checksum[..16.min(expected.checksum.len())],
                    &checksum[..16.min(checksum.len())]
                ),
            });
        }
        if abort.is_cancelled() {
            return Err(ModernizerError::Cancelled);
        }
        publish(staging, destination)?;
        Ok(TransferReceipt { bytes, checksum })
    }
}

impl Transfer for VerifiedCopy {
    fn transfer(
        &self,
        source: &Path,
        destination: &Path,
        staging: &Path,
        abort: &CancellationToken,
    ) -> Result<TransferReceipt> {
        let result = guard_destination(destination)
            .and_then(|_| self.stage(source, staging, abort))
            .and_then(|expected| self.verify_and_publish(staging, destination, &expected, abort));
        if result.is_err() {
            discard_staging(staging);
        }
        result
    }
}

/// Fail if something already sits at the destination.
pub fn guard_destination(destination: &Path) -> Result<()> {
    if destination.symlink_metadata().is_ok() {
        return Err(ModernizerError::CopyVerification {
            destination: destination.to_path_buf(),
            message: "destination already exists".to_string(),
        });
    }
    Ok(())
}

/// Remove a staging file, ignoring one that was never created.
pub fn discard_staging(staging: &Path) {
    match fs::remove_file(staging) {
        Ok(()) => debug!("Discarded staging file {}", staging.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => debug!("Could not discard {}: {}", staging.display(), e),
    }
}

/// Move the staging file onto the destination without clobbering.
///
/// A hard link fails atomically if the destination exists. Filesystems
/// without hard links fall back to a checked rename.
fn publish(staging: &Path, destination: &Path) -> Result<()> {
    match fs::hard_link(staging, destination) {
        Ok(()) => {
            fs::remove_file(staging).map_err(|e| ModernizerError::io_with_path(e, staging))?;
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(ModernizerError::CopyVerification {
            destination: destination.to_path_buf(),
            message: "destination appeared during copy".to_string(),
        }),
        Err(_) => {
            guard_destination(destination)?;
            fs::rename(staging, destination)
                .map_err(|e| ModernizerError::io_with_path(e, destination))
        }
    }
}
