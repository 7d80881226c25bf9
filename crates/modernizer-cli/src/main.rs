//! Modernizer CLI - command-line front-end for the archive modernizer.
//!
//! Human-readable summaries go to stdout, logs to stderr. `--json` prints
//! the full report document instead of the summary.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use modernizer_core::{
    MigrationOptions, Modernizer, RecognizerConfig, RunOutcome, TransformationRules,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "modernizer")]
#[command(about = "Migrate a legacy file archive into a standardized layout")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Print the full JSON report instead of a summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan an archive and report what was found
    Analyze {
        source: PathBuf,
        #[command(flatten)]
        recognition: RecognitionArgs,
    },
    /// Show the migration plan without touching the target
    Plan {
        source: PathBuf,
        target: PathBuf,
        #[command(flatten)]
        recognition: RecognitionArgs,
        /// Transformation rules (JSON); defaults apply when omitted
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// Execute the migration
    Migrate {
        source: PathBuf,
        target: PathBuf,
        #[command(flatten)]
        recognition: RecognitionArgs,
        /// Transformation rules (JSON); defaults apply when omitted
        #[arg(long)]
        rules: Option<PathBuf>,
        /// Number of parallel copy workers
        #[arg(short, long, default_value = "4")]
        workers: usize,
        /// Per-file copy timeout in seconds
        #[arg(long, default_value = "300")]
        timeout: u64,
        /// Log every operation as simulated without writing anything
        #[arg(long)]
        dry_run: bool,
        /// Remove sources once the whole run is verified
        #[arg(long)]
        delete_source: bool,
        /// Allow a target root that already holds files
        #[arg(long)]
        reuse_target: bool,
    },
    /// Roll back the last run recorded in a target root
    Rollback { target: PathBuf },
}

#[derive(Args, Debug)]
struct RecognitionArgs {
    /// Minimum files a naming convention must cover
    #[arg(long, default_value = "3")]
    min_support: usize,
}

impl RecognitionArgs {
    fn config(&self) -> RecognizerConfig {
        RecognizerConfig::default().with_min_support(self.min_support)
    }
}

fn load_rules(path: Option<&Path>) -> Result<TransformationRules> {
    match path {
        Some(path) => TransformationRules::from_json_file(path)
            .with_context(|| format!("Failed to load rules from {}", path.display())),
        None => Ok(TransformationRules::default()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match cli.command {
        Command::Analyze {
            source,
            recognition,
        } => {
            // The target is unused by analysis.
            let modernizer = Modernizer::new(&source, &source, TransformationRules::default())?
                .with_recognizer(recognition.config());
            let outcome = modernizer.analyze()?;
            let summary = &outcome.summary;
            if cli.json {
                print_json(summary)?;
                return Ok(ExitCode::SUCCESS);
            }
            println!("Archive: {}", summary.source_root.display());
            println!("Files:   {} ({} bytes)", summary.total_files, summary.total_bytes);
            if let Some(range) = &summary.date_range {
                println!(
                    "Dates:   {} .. {} ({:.1} years)",
                    range.earliest.format("%Y-%m-%d"),
                    range.latest.format("%Y-%m-%d"),
                    range.span_years()
                );
            }
            println!("Projects:");
            for project in &summary.projects {
                println!(
                    "  {:<32} {:>5} files  {}",
                    project.label, project.files, project.origin_year
                );
            }
            println!("Naming patterns:");
            for (name, count) in &summary.naming_patterns {
                println!("  {:<32} {:>5}", name, count);
            }
            println!("Version conflicts: {}", summary.version_conflicts.len());
            println!("Orphaned files:    {}", summary.orphaned_files.len());
            for rec in &summary.recommendations {
                println!("[{:?}] {}: {}", rec.priority, rec.category, rec.issue);
                println!("    {}", rec.recommendation);
            }
        }
        Command::Plan {
            source,
            target,
            recognition,
            rules,
        } => {
            let modernizer = Modernizer::new(&source, &target, load_rules(rules.as_deref())?)?
                .with_recognizer(recognition.config());
            let preview = modernizer.preview()?;
            if cli.json {
                print_json(&preview)?;
                return Ok(ExitCode::SUCCESS);
            }
            for entry in &preview.plan.entries {
                println!("{} -> {}", entry.source.display(), entry.target.display());
            }
            println!(
                "{} files planned into {} projects ({} warnings)",
                preview.plan.len(),
                preview.plan.projects.len(),
                preview.warnings.len()
            );
        }
        Command::Migrate {
            source,
            target,
            recognition,
            rules,
            workers,
            timeout,
            dry_run,
            delete_source,
            reuse_target,
        } => {
            let modernizer = Modernizer::new(&source, &target, load_rules(rules.as_deref())?)?
                .with_recognizer(recognition.config());
            let options = MigrationOptions::default()
                .with_workers(workers)
                .with_copy_timeout(Duration::from_secs(timeout))
                .with_dry_run(dry_run)
                .with_delete_source(delete_source)
                .with_reuse_target(reuse_target);
            let outcome = modernizer.migrate(options).await?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                let validation = &outcome.validation;
                println!("Run {}: {}", outcome.run_id, outcome.outcome);
                println!(
                    "  files migrated: {}/{}",
                    validation.files_migrated, validation.files_planned
                );
                println!(
                    "  edges: {} validated, {} broken, {} inconsistent",
                    validation.edges_validated, validation.edges_broken, validation.inconsistent_edges
                );
                if let Some(failure) = &outcome.execution.failure {
                    println!("  failure: {}", failure);
                }
                for warning in &validation.warnings {
                    println!("  warning [{}]: {:?}", warning.kind(), warning);
                }
            }
            if outcome.outcome == RunOutcome::FailedAndRolledBack {
                return Ok(ExitCode::from(2));
            }
        }
        Command::Rollback { target } => {
            let modernizer = Modernizer::new(&target, &target, TransformationRules::default())?;
            let report = modernizer.rollback()?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "Rolled back {} operations ({} sources restored, {} untouched)",
                    report.rolled_back, report.restored_sources, report.untouched
                );
                for warning in &report.warnings {
                    println!("  warning [{}]: {:?}", warning.kind(), warning);
                }
            }
            info!("Rollback finished");
            if !report.is_complete() {
                return Ok(ExitCode::from(1));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_migrate_flags() {
        let cli = Cli::parse_from([
            "modernizer", "migrate", "/old", "/new", "--dry-run", "--workers", "8",
        ]);
        match cli.command {
            Command::Migrate {
                dry_run, workers, delete_source, ..
            } => {
                assert!(dry_run);
                assert!(!delete_source);
                assert_eq!(workers, 8);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
