//! Relationship validation.
//!
//! Checks every graph edge against the executed plan:
//!
//! - **SAME_PROJECT**: both endpoints live in the same project folder.
//! - **REVISION_OF**: the revision numbers read back out of the target file
//!   names strictly increase from the older to the newer file. Templates
//!   without a `{revision}` slot compare sequence numbers instead.
//! - **REFERENCED_BY**: both endpoints resolve; inside one entity they also
//!   share the project folder.
//!
//! Edges inside a reported revision cycle are inconsistent, not broken.

use crate::catalog::{Catalog, SkippedSubtree};
use crate::context::RunContext;
use crate::error::Warning;
use crate::executor::{ExecutionReport, ExecutionState};
use crate::graph::{EdgeKind, RelationshipEdge, RelationshipGraph};
use crate::planner::template::TemplateSlot;
use crate::planner::{strip_collision_suffix, CompiledRules, MigrationPlan, PlanEntry};
use crate::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// An edge that did not survive the migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenEdge {
    pub kind: EdgeKind,
    /// Target path of the edge source, if it resolved.
    pub source: Option<PathBuf>,
    /// Target path of the edge target, if it resolved.
    pub target: Option<PathBuf>,
    pub reason: String,
}

/// Pass/fail summary of a migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub generated_at: DateTime<Utc>,
    pub plan_fingerprint: String,
    pub files_planned: usize,
    pub files_migrated: usize,
    pub edges_validated: usize,
    pub edges_broken: usize,
    pub broken_edges: Vec<BrokenEdge>,
    /// REVISION_OF edges inside a revision cycle.
    pub inconsistent_edges: usize,
    pub cross_project_references: usize,
    /// Subtrees the scan could not read.
    pub incomplete_coverage: Vec<SkippedSubtree>,
    pub warnings: Vec<Warning>,
    pub accepted: bool,
}

impl ValidationReport {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty() || !self.incomplete_coverage.is_empty() || self.inconsistent_edges > 0
    }
}

enum EdgeCheck {
    Valid,
    CrossProject,
    Inconsistent,
    Broken(String),
}

/// Per-category filename parser.
struct NameParser {
    regex: Regex,
    by_revision: bool,
}

/// Validates executed plans against the relationship graph.
pub struct Validator {
    parsers: HashMap<String, NameParser>,
    target_root: Option<PathBuf>,
}

impl Validator {
    /// Build filename parsers for every category of the rules.
    pub fn new(rules: &CompiledRules) -> Result<Self> {
        let mut parsers = HashMap::new();
        for category in &rules.categories {
            let regex = category.template.parser(&rules.rules.revision_format)?;
            parsers.insert(
                category.rule.name.clone(),
                NameParser {
                    regex,
                    by_revision: category.template.has(TemplateSlot::Revision),
                },
            );
        }
        Ok(Self {
            parsers,
            target_root: None,
        })
    }

    /// Also require every endpoint to exist under `target_root`.
    pub fn with_target_root(mut self, target_root: impl Into<PathBuf>) -> Self {
        self.target_root = Some(target_root.into());
        self
    }

    /// Validate every edge of `graph` against `plan`.
    ///
    /// With an execution report, the run is accepted only if it completed;
    /// a dry run is validated against the plan alone.
    pub fn validate(
        &self,
        plan: &MigrationPlan,
        graph: &RelationshipGraph,
        catalog: &Catalog,
        execution: Option<&ExecutionReport>,
        ctx: &RunContext,
    ) -> ValidationReport {
        let on_disk = execution.is_some_and(|e| !e.dry_run && e.state == ExecutionState::Completed);
        let mut report = ValidationReport {
            generated_at: Utc::now(),
            plan_fingerprint: plan.fingerprint.clone(),
            files_planned: plan.len(),
            files_migrated: execution.map_or(plan.len(), |e| e.files_transferred),
            edges_validated: 0,
            edges_broken: 0,
            broken_edges: Vec::new(),
            inconsistent_edges: 0,
            cross_project_references: 0,
            incomplete_coverage: catalog.skipped().to_vec(),
            warnings: ctx.warnings().to_vec(),
            accepted: false,
        };

        for edge in graph.edges() {
            let source = plan.entry_for(edge.source);
            let target = plan.entry_for(edge.target);
            let check = match (source, target) {
                (Some(s), Some(t)) => match self.missing_on_disk(s, t, on_disk) {
                    Some(reason) => EdgeCheck::Broken(reason),
                    None => self.check_edge(edge, s, t, plan, graph),
                },
                _ => EdgeCheck::Broken("endpoint missing from plan".to_string()),
            };

            report.edges_validated += 1;
            match check {
                EdgeCheck::Valid => {}
                EdgeCheck::CrossProject => report.cross_project_references += 1,
                EdgeCheck::Inconsistent => report.inconsistent_edges += 1,
                EdgeCheck::Broken(reason) => {
                    warn!("Broken {:?} edge {} -> {}: {}", edge.kind, edge.source, edge.target, reason);
                    report.edges_broken += 1;
                    report.broken_edges.push(BrokenEdge {
                        kind: edge.kind,
                        source: source.map(|e| e.target.clone()),
                        target: target.map(|e| e.target.clone()),
                        reason,
                    });
                }
            }
        }

        let completed = execution.map_or(true, |e| e.state == ExecutionState::Completed);
        report.accepted = report.edges_broken == 0 && completed;
        info!(
            "Validated {} edges: {} broken, {} inconsistent, {} cross-project; accepted={}",
            report.edges_validated,
            report.edges_broken,
            report.inconsistent_edges,
            report.cross_project_references,
            report.accepted
        );
        report
    }

    fn missing_on_disk(&self, a: &PlanEntry, b: &PlanEntry, on_disk: bool) -> Option<String> {
        let root = self.target_root.as_ref().filter(|_| on_disk)?;
        [a, b]
            .into_iter()
            .find(|e| !root.join(&e.target).is_file())
            .map(|e| format!("{} missing from target root", e.target.display()))
    }

    fn check_edge(
        &self,
        edge: &RelationshipEdge,
        source: &PlanEntry,
        target: &PlanEntry,
        plan: &MigrationPlan,
        graph: &RelationshipGraph,
    ) -> EdgeCheck {
        match edge.kind {
            EdgeKind::SameProject => same_folder(source, target, plan),
            EdgeKind::RevisionOf => {
                if graph.in_revision_cycle(edge) {
                    return EdgeCheck::Inconsistent;
                }
                match same_folder(source, target, plan) {
                    EdgeCheck::Valid => {}
                    other => return other,
                }
                match (self.revision_number(source), self.revision_number(target)) {
                    (Some(older), Some(newer)) if older < newer => EdgeCheck::Valid,
                    (Some(older), Some(newer)) => EdgeCheck::Broken(format!(
                        "revision does not increase: {} then {}",
                        older, newer
                    )),
                    _ => EdgeCheck::Broken("revision not readable from target name".to_string()),
                }
            }
            EdgeKind::ReferencedBy => {
                if source.entity != target.entity {
                    EdgeCheck::CrossProject
                } else {
                    same_folder(source, target, plan)
                }
            }
        }
    }

    /// The number that orders revisions in a planned file name.
    fn revision_number(&self, entry: &PlanEntry) -> Option<u64> {
        let parser = self.parsers.get(&entry.category)?;
        let name = entry.target.file_name()?.to_string_lossy();
        let name = strip_collision_suffix(&name);
        let caps = parser.regex.captures(&name)?;
        let group = if parser.by_revision { "revision" } else { "sequence" };
        caps.name(group)?.as_str().parse().ok()
    }
}

/// Both entries sit under the project folder of their (shared) entity.
fn same_folder(a: &PlanEntry, b: &PlanEntry, plan: &MigrationPlan) -> EdgeCheck {
    let folder_of = |e: &PlanEntry| -> Option<&Path> {
        plan.project(e.entity)
            .map(|p| p.folder.as_path())
            .filter(|folder| e.target.starts_with(folder))
    };
    match (folder_of(a), folder_of(b)) {
        (Some(fa), Some(fb)) if fa == fb => EdgeCheck::Valid,
        (Some(fa), Some(fb)) => EdgeCheck::Broken(format!(
            "split across {} and {}",
            fa.display(),
            fb.display()
        )),
        _ => EdgeCheck::Broken("target outside its project folder".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conventions::Recognizer;
    use crate::planner::{Planner, TransformationRules};
    use chrono::TimeZone;

    struct Fixture {
        catalog: Catalog,
        graph: RelationshipGraph,
        plan: MigrationPlan,
        ctx: RunContext,
        rules: TransformationRules,
    }

    fn fixture(paths: &[(&str, u32)], rules: TransformationRules) -> Fixture {
        let catalog = Catalog::from_listing(
            "/archive",
            paths.iter().map(|(p, day)| {
                (
                    PathBuf::from(p),
                    1,
                    Utc.with_ymd_and_hms(2016, 2, *day, 0, 0, 0).unwrap(),
                )
            }),
        );
        let mut ctx = RunContext::new();
        let recognition = Recognizer::default().recognize(&catalog, &mut ctx);
        let graph = RelationshipGraph::build(&catalog, &recognition, &mut ctx);
        let plan = Planner::new(&rules)
            .unwrap()
            .plan(&catalog, &recognition, &graph, &mut ctx)
            .unwrap();
        Fixture {
            catalog,
            graph,
            plan,
            ctx,
            rules,
        }
    }

    fn validate(f: &Fixture) -> ValidationReport {
        Validator::new(&f.rules.compile().unwrap())
            .unwrap()
            .validate(&f.plan, &f.graph, &f.catalog, None, &f.ctx)
    }

    const BETA: &[(&str, u32)] = &[
        ("ProjectBeta_2016/Beta_Assembly_R1.dwg", 1),
        ("ProjectBeta_2016/Beta_Assembly_R2.dwg", 2),
        ("ProjectBeta_2016/ProjectBeta_Specifications_Final.pdf", 3),
    ];

    #[test]
    fn test_beta_has_no_broken_edges() {
        let f = fixture(BETA, TransformationRules::default());
        let report = validate(&f);
        assert_eq!(report.edges_broken, 0);
        assert_eq!(report.files_migrated, 3);
        // Two SAME_PROJECT edges and one REVISION_OF edge.
        assert_eq!(report.edges_validated, 3);
        assert!(report.accepted);
    }

    #[test]
    fn test_moved_file_breaks_same_project() {
        let mut f = fixture(BETA, TransformationRules::default());
        f.plan.entries[2].target = PathBuf::from("Projects/Elsewhere/spec.pdf");
        let report = validate(&f);
        assert_eq!(report.edges_broken, 1);
        assert_eq!(report.broken_edges[0].kind, EdgeKind::SameProject);
        assert!(!report.accepted);
    }

    #[test]
    fn test_swapped_revisions_break_revision_edge() {
        let mut f = fixture(BETA, TransformationRules::default());
        let first = f.plan.entries[0].target.clone();
        f.plan.entries[0].target = f.plan.entries[1].target.clone();
        f.plan.entries[1].target = first;
        let report = validate(&f);
        assert_eq!(report.edges_broken, 1);
        assert_eq!(report.broken_edges[0].kind, EdgeKind::RevisionOf);
    }

    #[test]
    fn test_sequence_orders_when_template_has_no_revision() {
        let mut rules = TransformationRules::default();
        rules.filename_template = "{project_code}-{category_tag}-{sequence}_{description}.{ext}".into();
        let f = fixture(BETA, rules);
        let report = validate(&f);
        assert_eq!(report.edges_broken, 0);
        assert!(report.accepted);
    }

    #[test]
    fn test_cycle_edges_are_inconsistent_not_broken() {
        let f = fixture(
            &[("Gamma/Housing_R1.dwg", 9), ("Gamma/Housing_R2.dwg", 1), ("Gamma/Housing.dwg", 5)],
            TransformationRules::default(),
        );
        let report = validate(&f);
        assert_eq!(report.inconsistent_edges, 3);
        assert_eq!(report.edges_broken, 0);
        assert!(report.has_warnings());
        assert!(report.accepted);
    }

    #[test]
    fn test_cross_project_references_counted() {
        let f = fixture(
            &[("Delta/DEL-ASM-001.dwg", 1), ("Echo/Echo_uses_DEL-ASM-001.pdf", 2)],
            TransformationRules::default(),
        );
        let report = validate(&f);
        assert_eq!(report.cross_project_references, 1);
        assert_eq!(report.edges_broken, 0);
    }
}
