//! Modernizer Core - Headless engine for migrating legacy file archives.
//!
//! The engine infers naming conventions from a chaotic archive, groups files
//! into projects, plans a standardized layout and applies it as a logged,
//! reversible transaction:
//!
//! ```text
//! Catalog -> Recognizer -> Graph -> Planner -> Executor -> Validator
//! ```
//!
//! Every stage fully consumes its predecessor's output. The archive is only
//! read until a plan is executed; execution copies (never moves first) and
//! can always be rolled back through the operation log.
//!
//! # Example
//!
//! ```rust,ignore
//! use modernizer_core::{MigrationOptions, Modernizer, TransformationRules};
//!
//! #[tokio::main]
//! async fn main() -> modernizer_core::Result<()> {
//!     let modernizer = Modernizer::new("/archive/legacy", "/archive/modern", TransformationRules::default())?;
//!
//!     let preview = modernizer.preview()?;
//!     println!("{} files planned", preview.plan.len());
//!
//!     let outcome = modernizer.migrate(MigrationOptions::default()).await?;
//!     println!("{}", outcome.outcome);
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod context;
pub mod conventions;
pub mod error;
pub mod executor;
pub mod graph;
pub mod naming;
pub mod persist;
pub mod planner;
pub mod validation;

// Re-export commonly used types
pub use analysis::{Analysis, ArchiveSummary, Recommendation};
pub use cancel::{CancellationToken, CancelledError};
pub use catalog::{Catalog, FileId, FileRecord, Scanner};
pub use context::RunContext;
pub use conventions::{ConventionPattern, Recognizer, RecognizerConfig};
pub use error::{ModernizerError, Result, Warning};
pub use executor::{
    ExecutionReport, ExecutionState, Executor, ExecutorOptions, OperationLogEntry, RollbackReport,
    Transfer,
};
pub use graph::{EdgeKind, EntityId, RelationshipEdge, RelationshipGraph};
pub use planner::{MigrationPlan, PlanEntry, Planner, TransformationRules};
pub use validation::{ValidationReport, Validator};

use config::ControlConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Knobs of a migration run.
pub type MigrationOptions = ExecutorOptions;

/// The single end state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    CompletedAndValidated,
    CompletedWithWarnings,
    FailedAndRolledBack,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunOutcome::CompletedAndValidated => "COMPLETED-AND-VALIDATED",
            RunOutcome::CompletedWithWarnings => "COMPLETED-WITH-WARNINGS",
            RunOutcome::FailedAndRolledBack => "FAILED-AND-ROLLED-BACK",
        };
        f.write_str(name)
    }
}

/// Result of [`Modernizer::analyze`].
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub analysis: Analysis,
    pub summary: ArchiveSummary,
    pub warnings: Vec<Warning>,
}

/// Result of [`Modernizer::preview`]: the plan that `migrate` would apply.
#[derive(Debug, Clone, Serialize)]
pub struct PlanPreview {
    pub plan: MigrationPlan,
    pub summary: ArchiveSummary,
    pub warnings: Vec<Warning>,
}

/// Result of [`Modernizer::migrate`].
#[derive(Debug, Clone, Serialize)]
pub struct MigrationOutcome {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub plan: MigrationPlan,
    pub execution: ExecutionReport,
    pub validation: ValidationReport,
    /// Rollback performed because validation rejected the run.
    pub rollback: Option<RollbackReport>,
}

/// Entry point: `(source_root, target_root, rules)` to analysis, plan
/// preview, executed run or rollback.
#[derive(Debug, Clone)]
pub struct Modernizer {
    source_root: PathBuf,
    target_root: PathBuf,
    recognizer: Recognizer,
    planner: Planner,
    transfer: Arc<dyn Transfer>,
}

impl Modernizer {
    /// Create a modernizer. Malformed rules fail here, before the archive
    /// is read.
    pub fn new(
        source_root: impl Into<PathBuf>,
        target_root: impl Into<PathBuf>,
        rules: TransformationRules,
    ) -> Result<Self> {
        Ok(Self {
            source_root: source_root.into(),
            target_root: target_root.into(),
            recognizer: Recognizer::default(),
            planner: Planner::new(&rules)?,
            transfer: Arc::new(executor::VerifiedCopy),
        })
    }

    pub fn with_recognizer(mut self, config: RecognizerConfig) -> Self {
        self.recognizer = Recognizer::new(config);
        self
    }

    /// Replace the file transfer used by `migrate`.
    pub fn with_transfer(mut self, transfer: Arc<dyn Transfer>) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn target_root(&self) -> &Path {
        &self.target_root
    }

    pub fn control_dir(&self) -> PathBuf {
        self.target_root.join(ControlConfig::CONTROL_DIR_NAME)
    }

    /// Scan and analyze the archive without planning.
    pub fn analyze(&self) -> Result<AnalysisOutcome> {
        let mut ctx = RunContext::new();
        let analysis = Analysis::run(&self.source_root, &self.recognizer, &mut ctx)?;
        let summary = analysis.summary();
        Ok(AnalysisOutcome {
            analysis,
            summary,
            warnings: ctx.take_warnings(),
        })
    }

    /// Analyze and plan without touching the target root.
    pub fn preview(&self) -> Result<PlanPreview> {
        let mut ctx = RunContext::new();
        let (analysis, plan) = self.analyze_and_plan(&mut ctx)?;
        Ok(PlanPreview {
            plan,
            summary: analysis.summary(),
            warnings: ctx.take_warnings(),
        })
    }

    /// Run the whole pipeline.
    ///
    /// Errors are returned only for conditions found before any mutation.
    /// Once execution starts, the run ends in one [`RunOutcome`]; a run that
    /// validation rejects is rolled back.
    pub async fn migrate(&self, options: MigrationOptions) -> Result<MigrationOutcome> {
        let mut ctx = RunContext::new();
        info!(
            "Run {}: migrating {} into {}",
            ctx.run_id(),
            self.source_root.display(),
            self.target_root.display()
        );
        let (analysis, plan) = self.analyze_and_plan(&mut ctx)?;
        self.check_roots(analysis.catalog.root())?;

        let dry_run = options.dry_run;
        let mut executor =
            Executor::with_transfer(&self.target_root, options, Arc::clone(&self.transfer));
        let execution = executor.execute(&plan, &mut ctx).await?;
        if !dry_run {
            self.persist_control_file(ControlConfig::PLAN_FILENAME, &plan);
        }

        let validator = Validator::new(self.planner.rules())?.with_target_root(&self.target_root);
        let mut validation =
            validator.validate(&plan, &analysis.graph, &analysis.catalog, Some(&execution), &ctx);

        let mut rollback = None;
        let outcome = if execution.state == ExecutionState::RolledBack {
            RunOutcome::FailedAndRolledBack
        } else if !validation.accepted {
            warn!(
                "Validation rejected the run ({} broken edges); rolling back",
                validation.edges_broken
            );
            rollback = Some(executor.rollback(&mut ctx).await?);
            RunOutcome::FailedAndRolledBack
        } else if validation.has_warnings() {
            RunOutcome::CompletedWithWarnings
        } else {
            RunOutcome::CompletedAndValidated
        };
        validation.warnings = ctx.warnings().to_vec();
        if !dry_run {
            self.persist_control_file(ControlConfig::REPORT_FILENAME, &validation);
        }

        info!("Run {} ended {}", ctx.run_id(), outcome);
        Ok(MigrationOutcome {
            run_id: ctx.run_id(),
            outcome,
            plan,
            execution,
            validation,
            rollback,
        })
    }

    /// Roll back the last run recorded in the target root's journal.
    pub fn rollback(&self) -> Result<RollbackReport> {
        let mut ctx = RunContext::new();
        Executor::rollback_journal(&self.target_root, &mut ctx)
    }

    /// Write a control file. The run has already happened, so a failure
    /// here is logged and does not change the outcome.
    fn persist_control_file<T: Serialize>(&self, name: &str, value: &T) {
        let path = self.control_dir().join(name);
        if let Err(e) = persist::atomic_write_json(&path, value) {
            warn!("Failed to write {}: {}", path.display(), e);
        }
    }

    fn analyze_and_plan(&self, ctx: &mut RunContext) -> Result<(Analysis, MigrationPlan)> {
        let analysis = Analysis::run(&self.source_root, &self.recognizer, ctx)?;
        let plan = self
            .planner
            .plan(&analysis.catalog, &analysis.recognition, &analysis.graph, ctx)?;
        Ok((analysis, plan))
    }

    /// The target root may not sit inside the scanned archive.
    fn check_roots(&self, scanned_root: &Path) -> Result<()> {
        let target = absolute_target(&self.target_root);
        if target.starts_with(scanned_root) {
            return Err(ModernizerError::Other(format!(
                "target root {} lies inside the source archive {}",
                self.target_root.display(),
                scanned_root.display()
            )));
        }
        Ok(())
    }
}

/// Canonical form of a possibly missing path: canonicalize the deepest
/// existing ancestor and re-append the rest.
fn absolute_target(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return rest.iter().rev().fold(canonical, |acc, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bad_rules_fail_at_construction() {
        let mut rules = TransformationRules::default();
        rules.categories.clear();
        assert!(matches!(
            Modernizer::new("/nowhere", "/elsewhere", rules),
            Err(ModernizerError::UnresolvableRule { .. })
        ));
    }

    #[tokio::test]
    async fn test_target_inside_source_is_refused() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("Alpha")).unwrap();
        std::fs::write(temp.path().join("Alpha/a.txt"), "a").unwrap();
        let modernizer = Modernizer::new(
            temp.path(),
            temp.path().join("modern"),
            TransformationRules::default(),
        )
        .unwrap();
        assert!(modernizer.migrate(MigrationOptions::default()).await.is_err());
        assert!(!temp.path().join("modern").exists());
    }

    #[tokio::test]
    async fn test_unwritable_plan_file_keeps_the_run() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("legacy");
        let target = temp.path().join("modern");
        std::fs::create_dir_all(source.join("Alpha")).unwrap();
        std::fs::write(source.join("Alpha/a.txt"), "a").unwrap();
        // A directory where the plan file should go makes the write fail.
        let control = target.join(ControlConfig::CONTROL_DIR_NAME);
        std::fs::create_dir_all(control.join(ControlConfig::PLAN_FILENAME)).unwrap();

        let modernizer = Modernizer::new(&source, &target, TransformationRules::default()).unwrap();
        let outcome = modernizer.migrate(MigrationOptions::default()).await.unwrap();

        assert_eq!(outcome.execution.state, ExecutionState::Completed);
        assert_ne!(outcome.outcome, RunOutcome::FailedAndRolledBack);
        assert!(control.join(ControlConfig::PLAN_FILENAME).is_dir());
        assert!(control.join(ControlConfig::REPORT_FILENAME).is_file());
        assert!(source.join("Alpha/a.txt").exists());
    }

    #[test]
    fn test_run_outcome_names() {
        assert_eq!(RunOutcome::FailedAndRolledBack.to_string(), "FAILED-AND-ROLLED-BACK");
        assert_eq!(
            serde_json::to_string(&RunOutcome::CompletedWithWarnings).unwrap(),
            "\"COMPLETED_WITH_WARNINGS\""
        );
    }
}
