//! Run-wide state threaded through the pipeline stages.

use crate::cancel::CancellationToken;
use crate::error::Warning;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

/// State shared by every stage of one run: identity, collected warnings,
/// project-code counters and the cancellation token.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    warnings: Vec<Warning>,
    code_counters: BTreeMap<String, u32>,
    cancellation: CancellationToken,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            warnings: Vec::new(),
            code_counters: BTreeMap::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Record a non-fatal finding.
    pub fn warn(&mut self, warning: Warning) {
        warn!(kind = warning.kind(), "{}", warning);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Allocate the next synthetic code for a prefix: `P001`, `P002`, ...
    ///
    /// Counters are independent per prefix and start at 1.
    pub fn next_code(&mut self, prefix: &str, digits: usize) -> String {
        let counter = self.code_counters.entry(prefix.to_string()).or_insert(0);
        *counter += 1;
        format!("{}{:0width$}", prefix, counter, width = digits)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}
