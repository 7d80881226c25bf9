//! Centralized configuration for the archive modernizer.
//!
//! Fixed engine constants live on unit structs; per-run knobs live on the
//! option structs of the stage that consumes them (`RecognizerConfig`,
//! `ExecutorOptions`) and on the `TransformationRules` document.

use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "Legacy Archive Modernizer";
    /// Bumped whenever the persisted plan/journal layout changes.
    pub const FORMAT_VERSION: u32 = 1;
}

/// Layout of the engine's control directory inside the target root.
pub struct ControlConfig;

impl ControlConfig {
    pub const CONTROL_DIR_NAME: &'static str = ".modernizer";
    pub const LOCK_FILENAME: &'static str = "migration.lock";
    pub const JOURNAL_FILENAME: &'static str = "operations.jsonl";
    pub const PLAN_FILENAME: &'static str = "plan.json";
    pub const REPORT_FILENAME: &'static str = "validation_report.json";
}

/// Convention recognition defaults.
pub struct RecognitionConfig;

impl RecognitionConfig {
    /// Minimum number of cohort files a template must cover to be registered.
    pub const MIN_SUPPORT: usize = 3;
    /// Minimum share of the cohort a template must cover.
    pub const MIN_COVERAGE: f64 = 0.0;
}

/// Transaction executor defaults.
pub struct ExecutionConfig;

impl ExecutionConfig {
    pub const DEFAULT_WORKERS: usize = 4;
    pub const MAX_WORKERS: usize = 64;
    pub const COPY_TIMEOUT: Duration = Duration::from_secs(300);
    pub const STAGING_SUFFIX: &'static str = ".part";
    /// Read buffer for copy and checksum passes (1MB).
    pub const COPY_CHUNK_SIZE: usize = 1024 * 1024;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_reasonable() {
        assert!(ExecutionConfig::DEFAULT_WORKERS >= 1);
        assert!(ExecutionConfig::DEFAULT_WORKERS <= ExecutionConfig::MAX_WORKERS);
        assert!(ExecutionConfig::COPY_TIMEOUT > Duration::ZERO);
        assert_eq!(RecognitionConfig::MIN_SUPPORT, 3);
    }

    #[test]
    fn test_control_dir_is_hidden() {
        assert!(ControlConfig::CONTROL_DIR_NAME.starts_with('.'));
    }
}
