//! Transaction executor.
//!
//! Applies a [`MigrationPlan`] as logged, reversible filesystem operations:
//!
//! 1. every missing target directory is created serially (MKDIR);
//! 2. files are copied and verified by a bounded worker pool (COPY, or MOVE
//!    when sources are to be deleted);
//! 3. once every copy succeeded, MOVE sources are deleted.
//!
//! The first failure cancels the run: no new copies are dispatched,
//! in-flight copies finish on their own, and the operation log is walked in
//! reverse to undo what was done. A journal that stops accepting writes is a
//! failure like any other; the in-memory log still drives the rollback.

pub mod lock;
pub mod log;
pub mod transfer;

pub use lock::TargetLock;
pub use log::{JournalSink, OperationKind, OperationLog, OperationLogEntry, Outcome};
pub use transfer::{Transfer, TransferReceipt, VerifiedCopy};

use crate::cancel::CancellationToken;
use crate::config::{ControlConfig, ExecutionConfig};
use crate::context::RunContext;
use crate::error::Warning;
use crate::planner::MigrationPlan;
use crate::{ModernizerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Per-run executor knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorOptions {
    pub workers: usize,
    pub copy_timeout: Duration,
    /// Log every step as SIMULATED without touching the filesystem.
    pub dry_run: bool,
    /// Delete sources after the whole run verified (MOVE).
    pub delete_source: bool,
    /// Allow a non-empty target root.
    pub reuse_target: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            workers: ExecutionConfig::DEFAULT_WORKERS,
            copy_timeout: ExecutionConfig::COPY_TIMEOUT,
            dry_run: false,
            delete_source: false,
            reuse_target: false,
        }
    }
}

impl ExecutorOptions {
    /// Worker count, clamped to `1..=MAX_WORKERS`.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, ExecutionConfig::MAX_WORKERS);
        self
    }

    pub fn with_copy_timeout(mut self, timeout: Duration) -> Self {
        self.copy_timeout = timeout;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_delete_source(mut self, delete_source: bool) -> Self {
        self.delete_source = delete_source;
        self
    }

    pub fn with_reuse_target(mut self, reuse_target: bool) -> Self {
        self.reuse_target = reuse_target;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    NotStarted,
    Running,
    Completed,
    Failed,
    RolledBack,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::NotStarted => "NOT_STARTED",
            ExecutionState::Running => "RUNNING",
            ExecutionState::Completed => "COMPLETED",
            ExecutionState::Failed => "FAILED",
            ExecutionState::RolledBack => "ROLLED_BACK",
        };
        f.write_str(name)
    }
}

/// What a rollback pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollbackReport {
    /// Entries flipped to ROLLED_BACK by this pass.
    pub rolled_back: usize,
    /// MOVE sources copied back from their destinations.
    pub restored_sources: usize,
    /// Entries left as they were (failed, simulated or already rolled back).
    pub untouched: usize,
    pub warnings: Vec<Warning>,
}

impl RollbackReport {
    /// Whether everything that needed undoing was undone.
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Summary of one executor run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub state: ExecutionState,
    pub dry_run: bool,
    pub directories_created: usize,
    pub files_transferred: usize,
    pub sources_removed: usize,
    /// Reason of the first failure, if any.
    pub failure: Option<String>,
    pub rollback: Option<RollbackReport>,
    pub operations: Vec<OperationLogEntry>,
}

/// Applies one plan to one target root.
#[derive(Debug)]
pub struct Executor {
    target_root: PathBuf,
    options: ExecutorOptions,
    transfer: Arc<dyn Transfer>,
    log: Arc<OperationLog>,
    journal_sink: Option<Box<dyn JournalSink>>,
    state: ExecutionState,
}

impl Executor {
    pub fn new(target_root: impl Into<PathBuf>, options: ExecutorOptions) -> Self {
        Self::with_transfer(target_root, options, Arc::new(VerifiedCopy))
    }

    /// An executor with a custom transfer implementation.
    pub fn with_transfer(
        target_root: impl Into<PathBuf>,
        options: ExecutorOptions,
        transfer: Arc<dyn Transfer>,
    ) -> Self {
        Self {
            target_root: target_root.into(),
            options,
            transfer,
            log: Arc::new(OperationLog::new()),
            journal_sink: None,
            state: ExecutionState::NotStarted,
        }
    }

    /// Journal to `sink` instead of the journal file in the control
    /// directory.
    pub fn with_journal_sink(mut self, sink: Box<dyn JournalSink>) -> Self {
        self.journal_sink = Some(sink);
        self
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    pub fn target_root(&self) -> &Path {
        &self.target_root
    }

    fn control_dir(&self) -> PathBuf {
        self.target_root.join(ControlConfig::CONTROL_DIR_NAME)
    }

    /// Apply the plan.
    ///
    /// Returns an error only for conditions found before any mutation
    /// (target not empty, target locked, wrong state, journal cannot be
    /// opened). Copy and journal failures during the run end in a
    /// ROLLED_BACK report instead.
    pub async fn execute(&mut self, plan: &MigrationPlan, ctx: &mut RunContext) -> Result<ExecutionReport> {
        if self.state != ExecutionState::NotStarted {
            return Err(ModernizerError::InvalidState {
                expected: ExecutionState::NotStarted.to_string(),
                actual: self.state.to_string(),
            });
        }
        if self.options.dry_run {
            check_target_root(&self.target_root, self.options.reuse_target)?;
            return self.simulate(plan);
        }

        fs::create_dir_all(&self.target_root)
            .map_err(|e| ModernizerError::io_with_path(e, &self.target_root))?;
        let control_dir = self.control_dir();
        let control_existed = control_dir.exists();
        let lock = TargetLock::acquire(&control_dir)?;
        // Inspect the target only while holding the lock.
        if let Err(e) = check_target_root(&self.target_root, self.options.reuse_target) {
            drop(lock);
            if !control_existed {
                if let Err(e) = fs::remove_dir(&control_dir) {
                    debug!("Control directory {} kept: {}", control_dir.display(), e);
                }
            }
            return Err(e);
        }
        let _lock = lock;

        self.log = Arc::new(match self.journal_sink.take() {
            Some(sink) => OperationLog::with_sink(sink),
            None => OperationLog::with_journal(&control_dir.join(ControlConfig::JOURNAL_FILENAME))?,
        });
        self.state = ExecutionState::Running;
        info!(
            "Executing {} plan entries into {} ({} workers)",
            plan.len(),
            self.target_root.display(),
            self.options.workers
        );

        let token = ctx.cancellation().clone();
        self.create_directories(plan, &token);
        if !token.is_cancelled() {
            self.copy_files(plan, &token).await;
        }

        if token.is_cancelled() {
            self.state = ExecutionState::Failed;
            let failure = token.reason().unwrap_or("cancelled").to_string();
            error!("Execution failed: {}; rolling back", failure);
            let rollback = self.run_rollback(ctx).await?;
            self.state = ExecutionState::RolledBack;
            return Ok(self.report(Some(failure), Some(rollback)));
        }

        self.finalize_moves(ctx);
        self.state = ExecutionState::Completed;
        info!(
            "Execution completed: {} operations logged",
            self.log.len()
        );
        Ok(self.report(None, None))
    }

    /// Undo a completed or failed run on demand.
    pub async fn rollback(&mut self, ctx: &mut RunContext) -> Result<RollbackReport> {
        match self.state {
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::RolledBack => {}
            other => {
                return Err(ModernizerError::InvalidState {
                    expected: ExecutionState::Completed.to_string(),
                    actual: other.to_string(),
                })
            }
        }
        let _lock = if self.options.dry_run {
            None
        } else {
            Some(TargetLock::acquire(&self.control_dir())?)
        };
        let report = self.run_rollback(ctx).await?;
        self.state = ExecutionState::RolledBack;
        Ok(report)
    }

    /// Replay the journal of an earlier run under `target_root` and roll it
    /// back.
    pub fn rollback_journal(target_root: &Path, ctx: &mut RunContext) -> Result<RollbackReport> {
        let control = target_root.join(ControlConfig::CONTROL_DIR_NAME);
        let journal = control.join(ControlConfig::JOURNAL_FILENAME);
        if !journal.exists() {
            return Err(ModernizerError::Io {
                message: "no operation journal to roll back".to_string(),
                path: Some(journal),
                source: None,
            });
        }
        let _lock = TargetLock::acquire(&control)?;
        let log = OperationLog::replay(&journal)?;
        let report = rollback_log(&log, &VerifiedCopy);
        for warning in &report.warnings {
            ctx.warn(warning.clone());
        }
        Ok(report)
    }

    fn simulate(&mut self, plan: &MigrationPlan) -> Result<ExecutionReport> {
        self.state = ExecutionState::Running;
        for dir in plan.directories() {
            let absolute = self.target_root.join(&dir);
            if !absolute.is_dir() {
                self.log
                    .append(OperationKind::Mkdir, None, absolute, Outcome::Simulated)?;
            }
        }
        let kind = self.transfer_kind();
        for entry in &plan.entries {
            self.log.append(
                kind,
                Some(entry.source.clone()),
                self.target_root.join(&entry.target),
                Outcome::Simulated,
            )?;
        }
        self.state = ExecutionState::Completed;
        info!("Dry run simulated {} operations", self.log.len());
        Ok(self.report(None, None))
    }

    fn transfer_kind(&self) -> OperationKind {
        if self.options.delete_source {
            OperationKind::Move
        } else {
            OperationKind::Copy
        }
    }

    /// Create every missing directory, parents first. Existing directories
    /// are not logged, so rollback never touches them.
    fn create_directories(&self, plan: &MigrationPlan, token: &CancellationToken) {
        for dir in plan.directories() {
            let absolute = self.target_root.join(&dir);
            if absolute.is_dir() {
                continue;
            }
            let sequence =
                match self
                    .log
                    .append(OperationKind::Mkdir, None, absolute.clone(), Outcome::Pending)
                {
                    Ok(sequence) => sequence,
                    Err(e) => {
                        token.cancel_with_reason(journal_failure(&e));
                        return;
                    }
                };
            match fs::create_dir(&absolute) {
                Ok(()) => {
                    debug!("Created {}", absolute.display());
                    if let Err(e) = self.log.set_outcome(sequence, Outcome::Success) {
                        token.cancel_with_reason(journal_failure(&e));
                        return;
                    }
                }
                Err(e) => {
                    token.cancel_with_reason(format!("cannot create {}: {}", absolute.display(), e));
                    let recorded = self.log.update(sequence, |entry| {
                        entry.outcome = Outcome::Failed;
                        entry.error = Some(e.to_string());
                    });
                    if let Err(e) = recorded {
                        warn!("Failure of {} not journaled: {}", absolute.display(), e);
                    }
                    return;
                }
            }
        }
    }

    async fn copy_files(&self, plan: &MigrationPlan, token: &CancellationToken) {
        let kind = self.transfer_kind();
        let semaphore = Arc::new(Semaphore::new(self.options.workers));
        let mut workers = JoinSet::new();

        for entry in &plan.entries {
            if token.is_cancelled() {
                break;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            if token.is_cancelled() {
                break;
            }

            let destination = self.target_root.join(&entry.target);
            let sequence = match self.log.append(
                kind,
                Some(entry.source.clone()),
                destination.clone(),
                Outcome::Pending,
            ) {
                Ok(sequence) => sequence,
                Err(e) => {
                    token.cancel_with_reason(journal_failure(&e));
                    break;
                }
            };
            let job = CopyJob {
                sequence,
                staging: transfer::staging_path(&destination, sequence),
                source: entry.source.clone(),
                destination,
                timeout: self.options.copy_timeout,
            };
            let log = Arc::clone(&self.log);
            let transfer = Arc::clone(&self.transfer);
            let token = token.clone();
            workers.spawn(async move {
                let _permit = permit;
                run_copy(job, transfer, log, token).await;
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                token.cancel_with_reason(format!("copy worker failed: {}", e));
            }
        }
    }

    /// Delete MOVE sources.
    ///
    /// The removal is journaled before the file is deleted. A source whose
    /// removal cannot be journaled or performed stays where it is with a
    /// warning; its content is already verified at the target.
    fn finalize_moves(&self, ctx: &mut RunContext) {
        for entry in self.log.entries() {
            if entry.kind != OperationKind::Move || entry.outcome != Outcome::Success {
                continue;
            }
            let Some(source) = entry.source.as_ref() else {
                continue;
            };
            if let Err(e) = self.log.update(entry.sequence, |e| e.source_removed = true) {
                self.keep_source(entry.sequence);
                ctx.warn(Warning::SourceRetained {
                    path: source.clone(),
                    message: journal_failure(&e),
                });
                continue;
            }
            if let Err(e) = fs::remove_file(source) {
                self.keep_source(entry.sequence);
                ctx.warn(Warning::SourceRetained {
                    path: source.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    fn keep_source(&self, sequence: u64) {
        if let Err(e) = self.log.update(sequence, |e| e.source_removed = false) {
            warn!("Journal still marks the source of operation {} as removed: {}", sequence, e);
        }
    }

    async fn run_rollback(&self, ctx: &mut RunContext) -> Result<RollbackReport> {
        let log = Arc::clone(&self.log);
        let transfer = Arc::clone(&self.transfer);
        let report = tokio::task::spawn_blocking(move || rollback_log(&log, transfer.as_ref()))
            .await
            .map_err(|e| ModernizerError::Other(format!("rollback worker failed: {}", e)))?;
        for warning in &report.warnings {
            ctx.warn(warning.clone());
        }
        Ok(report)
    }

    fn report(&self, failure: Option<String>, rollback: Option<RollbackReport>) -> ExecutionReport {
        let operations = self.log.entries();
        let counted = |kind: fn(OperationKind) -> bool| {
            operations
                .iter()
                .filter(|e| kind(e.kind) && e.outcome == Outcome::Success)
                .count()
        };
        ExecutionReport {
            state: self.state,
            dry_run: self.options.dry_run,
            directories_created: counted(|k| k == OperationKind::Mkdir),
            files_transferred: counted(|k| k != OperationKind::Mkdir),
            sources_removed: operations.iter().filter(|e| e.source_removed).count(),
            failure,
            rollback,
            operations,
        }
    }
}

/// Fail if the target root holds anything besides the control directory,
/// unless reuse was confirmed.
fn check_target_root(root: &Path, reuse_target: bool) -> Result<()> {
    if !root.exists() {
        return Ok(());
    }
    if !root.is_dir() {
        return Err(ModernizerError::Io {
            message: "target root is not a directory".to_string(),
            path: Some(root.to_path_buf()),
            source: None,
        });
    }
    if reuse_target {
        return Ok(());
    }
    let entries = fs::read_dir(root).map_err(|e| ModernizerError::io_with_path(e, root))?;
    for entry in entries {
        let entry = entry.map_err(|e| ModernizerError::io_with_path(e, root))?;
        if entry.file_name() != ControlConfig::CONTROL_DIR_NAME {
            return Err(ModernizerError::TargetNotEmpty(root.to_path_buf()));
        }
    }
    Ok(())
}

fn journal_failure(error: &ModernizerError) -> String {
    format!("journal write failed: {}", error)
}

struct CopyJob {
    sequence: u64,
    source: PathBuf,
    destination: PathBuf,
    staging: PathBuf,
    timeout: Duration,
}

/// One worker: transfer under a timeout and record the outcome.
async fn run_copy(
    job: CopyJob,
    transfer: Arc<dyn Transfer>,
    log: Arc<OperationLog>,
    token: CancellationToken,
) {
    let abort = CancellationToken::new();
    let blocking_abort = abort.clone();
    let (source, destination, staging) =
        (job.source.clone(), job.destination.clone(), job.staging.clone());
    let mut handle = tokio::task::spawn_blocking(move || {
        transfer.transfer(&source, &destination, &staging, &blocking_abort)
    });

    let result = match tokio::time::timeout(job.timeout, &mut handle).await {
        Ok(joined) => flatten(joined),
        Err(_) => {
            warn!("Copy of {} timed out; waiting for it to stop", job.source.display());
            abort.cancel();
            if let Ok(Ok(_)) = handle.await {
                // Finished after the deadline: the copy still counts as failed.
                let _ = fs::remove_file(&job.destination);
            }
            transfer::discard_staging(&job.staging);
            Err(ModernizerError::Timeout {
                path: job.source.clone(),
                timeout: job.timeout,
            })
        }
    };

    let recorded = match result {
        Ok(receipt) => {
            debug!(
                "Copied {} -> {} ({} bytes)",
                job.source.display(),
                job.destination.display(),
                receipt.bytes
            );
            log.update(job.sequence, |e| {
                e.outcome = Outcome::Success;
                e.checksum = Some(receipt.checksum);
            })
        }
        Err(e) => {
            error!("Copy of {} failed: {}", job.source.display(), e);
            token.cancel_with_reason(format!("{}: {}", job.source.display(), e));
            let message = e.to_string();
            log.update(job.sequence, |entry| {
                entry.outcome = Outcome::Failed;
                entry.error = Some(message);
            })
        }
    };
    if let Err(e) = recorded {
        token.cancel_with_reason(journal_failure(&e));
    }
}

fn flatten(
    joined: std::result::Result<Result<TransferReceipt>, tokio::task::JoinError>,
) -> Result<TransferReceipt> {
    joined
        .map_err(|e| ModernizerError::Other(format!("copy worker panicked: {}", e)))
        .and_then(|result| result)
}

/// Walk the log in reverse and undo every successful operation.
///
/// Idempotent: entries already ROLLED_BACK, FAILED or SIMULATED are left
/// alone, so a second pass over the same log changes nothing. Journal write
/// failures do not stop the walk; they are reported as warnings.
pub fn rollback_log(log: &OperationLog, transfer: &dyn Transfer) -> RollbackReport {
    let mut report = RollbackReport::default();
    let entries = log.entries();
    info!("Rolling back {} logged operations", entries.len());

    for entry in entries.iter().rev() {
        match (entry.outcome, entry.kind) {
            (Outcome::Success, OperationKind::Mkdir) => match fs::remove_dir(&entry.destination) {
                Ok(()) => {
                    record(log, entry, &mut report, |e| e.outcome = Outcome::RolledBack);
                    report.rolled_back += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    record(log, entry, &mut report, |e| e.outcome = Outcome::RolledBack);
                    report.rolled_back += 1;
                }
                Err(e) => report.warnings.push(Warning::RollbackIncomplete {
                    path: entry.destination.clone(),
                    message: format!("directory kept: {}", e),
                }),
            },
            (Outcome::Success, OperationKind::Copy | OperationKind::Move) => {
                if entry.source_removed {
                    if let Err(warning) = restore_source(entry, transfer) {
                        report.warnings.push(warning);
                        continue;
                    }
                    record(log, entry, &mut report, |e| e.source_removed = false);
                    report.restored_sources += 1;
                }
                match fs::remove_file(&entry.destination) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        report.warnings.push(Warning::RollbackIncomplete {
                            path: entry.destination.clone(),
                            message: format!("file kept: {}", e),
                        });
                        continue;
                    }
                }
                record(log, entry, &mut report, |e| e.outcome = Outcome::RolledBack);
                report.rolled_back += 1;
            }
            (Outcome::Pending, OperationKind::Copy | OperationKind::Move) => {
                // Interrupted by a crash: drop the staging file and any
                // published copy that provably came from the source.
                transfer::discard_staging(&transfer::staging_path(&entry.destination, entry.sequence));
                let ours = entry.source.as_ref().is_some_and(|source| {
                    matches!(
                        (transfer::hash_file(source), transfer::hash_file(&entry.destination)),
                        (Ok(a), Ok(b)) if a == b
                    )
                });
                if ours {
                    if let Err(e) = fs::remove_file(&entry.destination) {
                        report.warnings.push(Warning::RollbackIncomplete {
                            path: entry.destination.clone(),
                            message: format!("file kept: {}", e),
                        });
                        continue;
                    }
                }
                record(log, entry, &mut report, |e| {
                    e.outcome = Outcome::Failed;
                    e.error = Some("interrupted before completion".to_string());
                });
                report.untouched += 1;
            }
            (Outcome::Pending, OperationKind::Mkdir) => {
                if fs::remove_dir(&entry.destination).is_ok() {
                    debug!("Removed interrupted directory {}", entry.destination.display());
                }
                record(log, entry, &mut report, |e| {
                    e.outcome = Outcome::Failed;
                    e.error = Some("interrupted before completion".to_string());
                });
                report.untouched += 1;
            }
            _ => report.untouched += 1,
        }
    }

    info!(
        "Rollback done: {} reverted, {} sources restored, {} warnings",
        report.rolled_back,
        report.restored_sources,
        report.warnings.len()
    );
    report
}

/// Apply a rollback step to the log. A journal that rejects the write
/// leaves the in-memory entry updated and the lag reported.
fn record<F>(log: &OperationLog, entry: &OperationLogEntry, report: &mut RollbackReport, change: F)
where
    F: FnOnce(&mut OperationLogEntry),
{
    if let Err(e) = log.update(entry.sequence, change) {
        warn!("Rollback of operation {} not journaled: {}", entry.sequence, e);
        report.warnings.push(Warning::RollbackIncomplete {
            path: entry.destination.clone(),
            message: journal_failure(&e),
        });
    }
}

/// Copy a MOVE destination back to its deleted source.
fn restore_source(
    entry: &OperationLogEntry,
    transfer: &dyn Transfer,
) -> std::result::Result<(), Warning> {
    let Some(source) = entry.source.as_ref() else {
        return Err(Warning::RollbackIncomplete {
            path: entry.destination.clone(),
            message: "MOVE entry without a source".to_string(),
        });
    };
    if source.exists() {
        // Removal journaled but never performed.
        let identical = matches!(
            (transfer::hash_file(source), transfer::hash_file(&entry.destination)),
            (Ok(a), Ok(b)) if a == b
        );
        if identical {
            debug!("Source {} is already in place", source.display());
            return Ok(());
        }
        return Err(Warning::RollbackIncomplete {
            path: source.clone(),
            message: "source exists with different content".to_string(),
        });
    }
    if let Some(parent) = source.parent() {
        fs::create_dir_all(parent).map_err(|e| Warning::RollbackIncomplete {
            path: source.clone(),
            message: format!("cannot recreate source folder: {}", e),
        })?;
    }
    let staging = transfer::staging_path(source, entry.sequence);
    let receipt = transfer
        .transfer(&entry.destination, source, &staging, &CancellationToken::new())
        .map_err(|e| Warning::RollbackIncomplete {
            path: source.clone(),
            message: format!("source not restored: {}", e),
        })?;
    if let Some(expected) = &entry.checksum {
        if &receipt.checksum != expected {
            warn!("Restored {} differs from the migrated checksum", source.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FileId;
    use crate::graph::EntityId;
    use crate::planner::PlanEntry;
    use tempfile::TempDir;

    fn plan_of(source_root: &Path, files: &[(&str, &str)]) -> MigrationPlan {
        let entries = files
            .iter()
            .enumerate()
            .map(|(i, (src, dst))| {
                let source = source_root.join(src);
                fs::create_dir_all(source.parent().unwrap()).unwrap();
                fs::write(&source, format!("content of {}", src)).unwrap();
                PlanEntry {
                    file: FileId(i),
                    source,
                    target: PathBuf::from(dst),
                    entity: EntityId(0),
                    project_code: "P001".into(),
                    category: "misc".into(),
                    sequence: i as u32 + 1,
                    revision: 1,
                }
            })
            .collect();
        MigrationPlan {
            format_version: 1,
            source_root: source_root.to_path_buf(),
            projects: Vec::new(),
            entries,
            fingerprint: String::new(),
        }
    }

    /// Fails every transfer whose source file name contains `victim`.
    #[derive(Debug)]
    struct FailingTransfer {
        victim: &'static str,
    }

    impl Transfer for FailingTransfer {
        fn transfer(
            &self,
            source: &Path,
            destination: &Path,
            staging: &Path,
            abort: &CancellationToken,
        ) -> Result<TransferReceipt> {
            if source.to_string_lossy().contains(self.victim) {
                return Err(ModernizerError::CopyVerification {
                    destination: destination.to_path_buf(),
                    message: "checksum mismatch".into(),
                });
            }
            VerifiedCopy.transfer(source, destination, staging, abort)
        }
    }

    /// Sleeps past any reasonable timeout.
    #[derive(Debug)]
    struct StallingTransfer;

    impl Transfer for StallingTransfer {
        fn transfer(
            &self,
            _source: &Path,
            _destination: &Path,
            _staging: &Path,
            abort: &CancellationToken,
        ) -> Result<TransferReceipt> {
            for _ in 0..200 {
                if abort.is_cancelled() {
                    return Err(ModernizerError::Cancelled);
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(ModernizerError::Other("stalled".into()))
        }
    }

    /// Accepts `remaining` journal lines, then fails every write.
    #[derive(Debug)]
    struct FullDisk {
        remaining: usize,
    }

    impl JournalSink for FullDisk {
        fn write_line(&mut self, _line: &str) -> std::io::Result<()> {
            if self.remaining == 0 {
                return Err(std::io::Error::other("no space left on device"));
            }
            self.remaining -= 1;
            Ok(())
        }
    }

    fn visible_entries(root: &Path) -> Vec<PathBuf> {
        if !root.exists() {
            return Vec::new();
        }
        let mut found: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| e.file_name() != ControlConfig::CONTROL_DIR_NAME)
            .filter_map(|e| e.ok())
            .map(|e| e.path().strip_prefix(root).unwrap().to_path_buf())
            .collect();
        found.sort();
        found
    }

    #[tokio::test]
    async fn test_copy_run_completes() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        let plan = plan_of(
            &temp.path().join("src"),
            &[("a.dwg", "Projects/P001/Drawings/a.dwg"), ("b.pdf", "Projects/P001/Docs/b.pdf")],
        );
        let mut executor = Executor::new(&target, ExecutorOptions::default().with_workers(2));
        let mut ctx = RunContext::new();
        let report = executor.execute(&plan, &mut ctx).await.unwrap();

        assert_eq!(report.state, ExecutionState::Completed);
        assert_eq!(report.files_transferred, 2);
        assert_eq!(report.directories_created, 4);
        assert_eq!(
            fs::read_to_string(target.join("Projects/P001/Drawings/a.dwg")).unwrap(),
            "content of a.dwg"
        );
        assert!(plan.entries[0].source.exists());
        assert!(report
            .operations
            .iter()
            .filter(|e| e.kind == OperationKind::Copy)
            .all(|e| e.checksum.is_some()));
        // Lock released, journal kept.
        let control = target.join(ControlConfig::CONTROL_DIR_NAME);
        assert!(!control.join(ControlConfig::LOCK_FILENAME).exists());
        assert!(control.join(ControlConfig::JOURNAL_FILENAME).exists());
    }

    #[tokio::test]
    async fn test_failure_rolls_back_everything() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        let plan = plan_of(
            &temp.path().join("src"),
            &[("A.dwg", "Projects/P001/A.dwg"), ("B.dwg", "Projects/P001/B.dwg")],
        );
        let mut executor = Executor::with_transfer(
            &target,
            ExecutorOptions::default().with_workers(1),
            Arc::new(FailingTransfer { victim: "B.dwg" }),
        );
        let mut ctx = RunContext::new();
        let report = executor.execute(&plan, &mut ctx).await.unwrap();

        assert_eq!(report.state, ExecutionState::RolledBack);
        assert!(report.failure.unwrap().contains("checksum mismatch"));
        assert!(visible_entries(&target).is_empty());

        let outcome_of = |name: &str| {
            report
                .operations
                .iter()
                .find(|e| e.destination.ends_with(name))
                .map(|e| e.outcome)
        };
        assert_eq!(outcome_of("A.dwg"), Some(Outcome::RolledBack));
        assert_eq!(outcome_of("B.dwg"), Some(Outcome::Failed));

        // A second rollback changes nothing.
        let again = executor.rollback(&mut ctx).await.unwrap();
        assert_eq!(again.rolled_back, 0);
        assert_eq!(executor.log().entries(), report.operations);
    }

    #[tokio::test]
    async fn test_timeout_is_a_failure() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        let plan = plan_of(&temp.path().join("src"), &[("slow.dwg", "P/slow.dwg")]);
        let mut executor = Executor::with_transfer(
            &target,
            ExecutorOptions::default().with_copy_timeout(Duration::from_millis(50)),
            Arc::new(StallingTransfer),
        );
        let mut ctx = RunContext::new();
        let report = executor.execute(&plan, &mut ctx).await.unwrap();
        assert_eq!(report.state, ExecutionState::RolledBack);
        assert!(report.failure.unwrap().contains("timed out"));
        assert!(visible_entries(&target).is_empty());
    }

    #[tokio::test]
    async fn test_move_deletes_sources_and_rollback_restores_them() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        let plan = plan_of(&temp.path().join("src"), &[("a.txt", "P/a.txt"), ("b.txt", "P/b.txt")]);
        let mut executor =
            Executor::new(&target, ExecutorOptions::default().with_delete_source(true));
        let mut ctx = RunContext::new();
        let report = executor.execute(&plan, &mut ctx).await.unwrap();
        assert_eq!(report.state, ExecutionState::Completed);
        assert_eq!(report.sources_removed, 2);
        assert!(!plan.entries[0].source.exists());

        let rollback = executor.rollback(&mut ctx).await.unwrap();
        assert_eq!(rollback.restored_sources, 2);
        assert!(rollback.is_complete());
        assert_eq!(fs::read_to_string(&plan.entries[1].source).unwrap(), "content of b.txt");
        assert!(visible_entries(&target).is_empty());
        assert_eq!(executor.state(), ExecutionState::RolledBack);
    }

    #[tokio::test]
    async fn test_journal_failure_rolls_back() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        let plan = plan_of(&temp.path().join("src"), &[("a.dwg", "P/a.dwg"), ("b.dwg", "P/b.dwg")]);
        // MKDIR and the first copy are journaled; the second copy's
        // completion is not.
        let mut executor = Executor::new(&target, ExecutorOptions::default().with_workers(1))
            .with_journal_sink(Box::new(FullDisk { remaining: 5 }));
        let mut ctx = RunContext::new();
        let report = executor.execute(&plan, &mut ctx).await.unwrap();

        assert_eq!(report.state, ExecutionState::RolledBack);
        assert_eq!(executor.state(), ExecutionState::RolledBack);
        assert!(report.failure.unwrap().contains("journal write failed"));
        assert!(visible_entries(&target).is_empty());
        assert!(report
            .operations
            .iter()
            .all(|e| e.outcome == Outcome::RolledBack));
        assert!(plan.entries.iter().all(|e| e.source.exists()));
    }

    #[tokio::test]
    async fn test_unjournaled_source_removal_keeps_source() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        let plan = plan_of(&temp.path().join("src"), &[("a.txt", "P/a.txt"), ("b.txt", "P/b.txt")]);
        // Everything up to the removal of the first source is journaled.
        let mut executor =
            Executor::new(&target, ExecutorOptions::default().with_delete_source(true))
                .with_journal_sink(Box::new(FullDisk { remaining: 7 }));
        let mut ctx = RunContext::new();
        let report = executor.execute(&plan, &mut ctx).await.unwrap();

        assert_eq!(report.state, ExecutionState::Completed);
        assert_eq!(report.sources_removed, 1);
        assert!(!plan.entries[0].source.exists());
        assert_eq!(fs::read_to_string(&plan.entries[1].source).unwrap(), "content of b.txt");
        assert!(ctx.warnings().iter().any(|w| w.kind() == "source_retained"));

        let rollback = executor.rollback(&mut ctx).await.unwrap();
        assert_eq!(rollback.restored_sources, 1);
        assert_eq!(fs::read_to_string(&plan.entries[0].source).unwrap(), "content of a.txt");
        assert_eq!(fs::read_to_string(&plan.entries[1].source).unwrap(), "content of b.txt");
        assert!(visible_entries(&target).is_empty());
    }

    #[test]
    fn test_restore_accepts_source_already_in_place() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src/a.txt");
        let destination = temp.path().join("target/a.txt");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::create_dir_all(destination.parent().unwrap()).unwrap();
        fs::write(&source, "same").unwrap();
        fs::write(&destination, "same").unwrap();

        let log = OperationLog::new();
        let seq = log
            .append(OperationKind::Move, Some(source.clone()), destination.clone(), Outcome::Pending)
            .unwrap();
        log.update(seq, |e| {
            e.outcome = Outcome::Success;
            e.source_removed = true;
        })
        .unwrap();

        let report = rollback_log(&log, &VerifiedCopy);
        assert!(report.is_complete());
        assert_eq!(report.restored_sources, 1);
        assert_eq!(fs::read_to_string(&source).unwrap(), "same");
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_locked_target_is_not_inspected() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        let control = target.join(ControlConfig::CONTROL_DIR_NAME);
        // Another run holds the lock and has already written files.
        let held = TargetLock::acquire(&control).unwrap();
        fs::create_dir_all(target.join("P")).unwrap();
        fs::write(target.join("P/other.txt"), "in flight").unwrap();

        let plan = plan_of(&temp.path().join("src"), &[("a.txt", "P/a.txt")]);
        let mut executor = Executor::new(&target, ExecutorOptions::default());
        assert!(matches!(
            executor.execute(&plan, &mut RunContext::new()).await,
            Err(ModernizerError::TargetLocked { .. })
        ));
        assert!(held.path().exists());
        assert_eq!(
            visible_entries(&target),
            vec![PathBuf::from("P"), PathBuf::from("P/other.txt")]
        );
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        let plan = plan_of(&temp.path().join("src"), &[("a.txt", "P/Q/a.txt")]);
        let mut executor = Executor::new(&target, ExecutorOptions::default().with_dry_run(true));
        let report = executor.execute(&plan, &mut RunContext::new()).await.unwrap();

        assert_eq!(report.state, ExecutionState::Completed);
        assert!(!target.exists());
        let kinds: Vec<_> = report.operations.iter().map(|e| (e.kind, e.outcome)).collect();
        assert_eq!(
            kinds,
            vec![
                (OperationKind::Mkdir, Outcome::Simulated),
                (OperationKind::Mkdir, Outcome::Simulated),
                (OperationKind::Copy, Outcome::Simulated),
            ]
        );
    }

    #[tokio::test]
    async fn test_non_empty_target_requires_reuse() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        fs::create_dir_all(target.join("keep")).unwrap();
        fs::write(target.join("keep/old.txt"), "old").unwrap();
        let plan = plan_of(&temp.path().join("src"), &[("a.txt", "keep/a.txt")]);

        let mut executor = Executor::new(&target, ExecutorOptions::default());
        assert!(matches!(
            executor.execute(&plan, &mut RunContext::new()).await,
            Err(ModernizerError::TargetNotEmpty(_))
        ));
        assert!(!target.join(ControlConfig::CONTROL_DIR_NAME).exists());

        let mut executor = Executor::new(&target, ExecutorOptions::default().with_reuse_target(true));
        let mut ctx = RunContext::new();
        let report = executor.execute(&plan, &mut ctx).await.unwrap();
        assert_eq!(report.directories_created, 0);
        executor.rollback(&mut ctx).await.unwrap();
        // Pre-existing content survives rollback.
        assert_eq!(
            visible_entries(&target),
            vec![PathBuf::from("keep"), PathBuf::from("keep/old.txt")]
        );
    }

    #[tokio::test]
    async fn test_rollback_keeps_non_empty_directories() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        let plan = plan_of(&temp.path().join("src"), &[("a.txt", "P/a.txt")]);
        let mut executor = Executor::new(&target, ExecutorOptions::default());
        let mut ctx = RunContext::new();
        executor.execute(&plan, &mut ctx).await.unwrap();
        fs::write(target.join("P/foreign.txt"), "someone else's").unwrap();

        let report = executor.rollback(&mut ctx).await.unwrap();
        assert!(!report.is_complete());
        assert!(target.join("P/foreign.txt").exists());
        assert!(!target.join("P/a.txt").exists());
        assert!(ctx.warnings().iter().any(|w| w.kind() == "rollback_incomplete"));
    }

    #[tokio::test]
    async fn test_rollback_from_journal() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        let plan = plan_of(&temp.path().join("src"), &[("a.txt", "P/a.txt")]);
        let mut executor = Executor::new(&target, ExecutorOptions::default());
        executor.execute(&plan, &mut RunContext::new()).await.unwrap();
        drop(executor);

        let mut ctx = RunContext::new();
        let report = Executor::rollback_journal(&target, &mut ctx).unwrap();
        assert_eq!(report.rolled_back, 2);
        assert!(visible_entries(&target).is_empty());
        let again = Executor::rollback_journal(&target, &mut ctx).unwrap();
        assert_eq!(again.rolled_back, 0);
    }

    #[tokio::test]
    async fn test_execute_twice_is_refused() {
        let temp = TempDir::new().unwrap();
        let plan = plan_of(&temp.path().join("src"), &[("a.txt", "a.txt")]);
        let mut executor = Executor::new(temp.path().join("t"), ExecutorOptions::default());
        let mut ctx = RunContext::new();
        executor.execute(&plan, &mut ctx).await.unwrap();
        assert!(matches!(
            executor.execute(&plan, &mut ctx).await,
            Err(ModernizerError::InvalidState { .. })
        ));
    }
}
