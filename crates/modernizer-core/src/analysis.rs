//! Read-only analysis of a legacy archive.
//!
//! [`Analysis`] bundles the first three pipeline stages (catalog, recognized
//! conventions, relationship graph). [`ArchiveSummary`] condenses it into the
//! numbers an operator looks at before approving a migration.

use crate::catalog::{Catalog, Scanner};
use crate::context::RunContext;
use crate::conventions::{Recognition, Recognizer};
use crate::error::Warning;
use crate::graph::RelationshipGraph;
use crate::naming;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Output of the analysis stages for one scan root.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub catalog: Catalog,
    pub recognition: Recognition,
    pub graph: RelationshipGraph,
}

impl Analysis {
    /// Scan `source_root`, recognize conventions and build the graph.
    ///
    /// Skipped subtrees become `AccessSkipped` warnings in `ctx`.
    pub fn run(source_root: &Path, recognizer: &Recognizer, ctx: &mut RunContext) -> Result<Self> {
        let catalog = Scanner::new(source_root)?.scan()?;
        for skipped in catalog.skipped() {
            ctx.warn(Warning::AccessSkipped {
                path: skipped.path.clone(),
                message: skipped.message.clone(),
            });
        }
        Ok(Self::from_catalog(catalog, recognizer, ctx))
    }

    /// Run recognition and grouping over an existing catalog.
    pub fn from_catalog(catalog: Catalog, recognizer: &Recognizer, ctx: &mut RunContext) -> Self {
        let recognition = recognizer.recognize(&catalog, ctx);
        let graph = RelationshipGraph::build(&catalog, &recognition, ctx);
        Self {
            catalog,
            recognition,
            graph,
        }
    }

    pub fn summary(&self) -> ArchiveSummary {
        ArchiveSummary::from_analysis(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
}

impl DateRange {
    pub fn span_years(&self) -> f64 {
        (self.latest - self.earliest).num_days() as f64 / 365.25
    }
}

/// A set of files that are revisions of one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConflict {
    pub key: String,
    pub files: Vec<PathBuf>,
    /// Newest revision, when the revisions could be ordered.
    pub latest: Option<PathBuf>,
    pub consistent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub category: String,
    pub issue: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub label: String,
    pub identifier: Option<String>,
    pub origin_year: i32,
    pub files: usize,
    pub unassigned: bool,
}

/// Operator-facing summary of an analyzed archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub source_root: PathBuf,
    pub total_files: usize,
    pub total_bytes: u64,
    /// File count per lowercased extension (`""` for none).
    pub file_types: BTreeMap<String, usize>,
    pub date_range: Option<DateRange>,
    /// Files per recognized pattern name, plus `unclassified`.
    pub naming_patterns: BTreeMap<String, usize>,
    pub projects: Vec<ProjectSummary>,
    pub version_conflicts: Vec<VersionConflict>,
    pub orphaned_files: Vec<PathBuf>,
    pub skipped_subtrees: usize,
    pub recommendations: Vec<Recommendation>,
}

impl ArchiveSummary {
    /// Patterns beyond which the archive counts as lacking a standard.
    const MAX_CONVENTIONS: usize = 3;

    pub fn from_analysis(analysis: &Analysis) -> Self {
        let catalog = &analysis.catalog;

        let mut file_types = BTreeMap::new();
        for record in catalog.iter() {
            *file_types.entry(record.extension.clone()).or_insert(0) += 1;
        }

        let date_range = catalog
            .iter()
            .map(|r| r.modified)
            .min()
            .zip(catalog.iter().map(|r| r.modified).max())
            .map(|(earliest, latest)| DateRange { earliest, latest });

        let mut naming_patterns = BTreeMap::new();
        for (id, count) in analysis.recognition.distribution() {
            if let Some(pattern) = analysis.recognition.pattern(id) {
                if count > 0 {
                    naming_patterns.insert(pattern.name.clone(), count);
                }
            }
        }
        let unmatched = analysis.recognition.unmatched_count();
        if unmatched > 0 {
            naming_patterns.insert("unclassified".to_string(), unmatched);
        }

        let projects = analysis
            .graph
            .entities()
            .iter()
            .map(|e| ProjectSummary {
                label: e.label.clone(),
                identifier: e.identifier.clone(),
                origin_year: e.origin_year,
                files: e.members.len(),
                unassigned: e.unassigned,
            })
            .collect();

        let path_of = |id| catalog.get(id).map(|r| r.relative_path.clone());
        let version_conflicts = analysis
            .graph
            .revision_groups()
            .iter()
            .map(|g| VersionConflict {
                key: g.key.clone(),
                files: g.members.iter().filter_map(|f| path_of(*f)).collect(),
                latest: g.chain.as_ref().and_then(|c| c.last()).and_then(|f| path_of(*f)),
                consistent: g.is_consistent(),
            })
            .collect::<Vec<_>>();

        let orphaned_files: Vec<PathBuf> = catalog
            .iter()
            .filter(|r| {
                let components = r.folder_components();
                naming::is_orphan_path(components.iter().map(String::as_str))
            })
            .map(|r| r.relative_path.clone())
            .collect();

        let mut summary = Self {
            source_root: catalog.root().to_path_buf(),
            total_files: catalog.len(),
            total_bytes: catalog.total_size(),
            file_types,
            date_range,
            naming_patterns,
            projects,
            version_conflicts,
            orphaned_files,
            skipped_subtrees: catalog.skipped().len(),
            recommendations: Vec::new(),
        };
        summary.recommendations = summary.recommend();
        info!(
            "Summary: {} files, {} projects, {} version conflicts, {} orphaned",
            summary.total_files,
            summary.projects.len(),
            summary.version_conflicts.len(),
            summary.orphaned_files.len()
        );
        summary
    }

    fn recommend(&self) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();

        if !self.version_conflicts.is_empty() {
            recommendations.push(Recommendation {
                priority: Priority::High,
                category: "Version Control".to_string(),
                issue: format!(
                    "{} sets of conflicting file versions detected",
                    self.version_conflicts.len()
                ),
                recommendation:
                    "Implement systematic version control with clear latest-version identification"
                        .to_string(),
            });
        }

        let conventions = self
            .naming_patterns
            .keys()
            .filter(|name| name.as_str() != "unclassified")
            .count();
        if conventions > Self::MAX_CONVENTIONS {
            recommendations.push(Recommendation {
                priority: Priority::Medium,
                category: "Standardization".to_string(),
                issue: format!("{} different naming conventions in use", conventions),
                recommendation: "Standardize on single naming convention across all projects"
                    .to_string(),
            });
        }

        if !self.orphaned_files.is_empty() {
            recommendations.push(Recommendation {
                priority: Priority::Medium,
                category: "Organization".to_string(),
                issue: format!(
                    "{} orphaned files in misc/temp folders",
                    self.orphaned_files.len()
                ),
                recommendation: "Archive or categorize orphaned files to reduce clutter".to_string(),
            });
        }

        if self.skipped_subtrees > 0 {
            recommendations.push(Recommendation {
                priority: Priority::Low,
                category: "Coverage".to_string(),
                issue: format!("{} subtrees could not be read", self.skipped_subtrees),
                recommendation: "Fix permissions and rescan before migrating".to_string(),
            });
        }

        recommendations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    fn analysis_for(paths: &[(&str, i32)]) -> Analysis {
        let catalog = Catalog::from_listing(
            "/archive",
            paths.iter().map(|(p, year)| {
                (
                    PathBuf::from(p),
                    1024,
                    Utc.with_ymd_and_hms(*year, 5, 1, 0, 0, 0).unwrap(),
                )
            }),
        );
        Analysis::from_catalog(catalog, &Recognizer::default(), &mut RunContext::new())
    }

    #[test]
    fn test_summary_counts() {
        let summary = analysis_for(&[
            ("2015_ProjectAlpha_Rev3/DWG_MainAssembly_v2_FINAL.dwg", 2015),
            ("2015_ProjectAlpha_Rev3/DWG_MainAssembly_v3_ACTUALFINAL.dwg", 2015),
            ("ProjectBeta_2016/Beta_BOM_v1.xlsx", 2016),
            ("MiscFiles/random_calc.xlsx", 2018),
        ])
        .summary();

        assert_eq!(summary.total_files, 4);
        assert_eq!(summary.total_bytes, 4096);
        assert_eq!(summary.file_types.get("dwg"), Some(&2));
        assert_eq!(summary.file_types.get("xlsx"), Some(&2));
        let range = summary.date_range.as_ref().unwrap();
        assert_eq!(range.earliest.year(), 2015);
        assert!((range.span_years() - 3.0).abs() < 0.01);
        assert_eq!(summary.projects.len(), 3);
        assert_eq!(summary.version_conflicts.len(), 1);
        assert_eq!(
            summary.version_conflicts[0].latest,
            Some(PathBuf::from(
                "2015_ProjectAlpha_Rev3/DWG_MainAssembly_v3_ACTUALFINAL.dwg"
            ))
        );
        assert_eq!(
            summary.orphaned_files,
            vec![PathBuf::from("MiscFiles/random_calc.xlsx")]
        );
    }

    #[test]
    fn test_recommendations() {
        let summary = analysis_for(&[
            ("Alpha/Housing_R1.dwg", 2015),
            ("Alpha/Housing_R2.dwg", 2016),
            ("Temp/scratch.txt", 2016),
        ])
        .summary();
        let categories: Vec<(&str, Priority)> = summary
            .recommendations
            .iter()
            .map(|r| (r.category.as_str(), r.priority))
            .collect();
        assert_eq!(
            categories,
            vec![
                ("Version Control", Priority::High),
                ("Organization", Priority::Medium)
            ]
        );
    }

    #[test]
    fn test_empty_archive() {
        let summary = analysis_for(&[]).summary();
        assert_eq!(summary.total_files, 0);
        assert!(summary.date_range.is_none());
        assert!(summary.recommendations.is_empty());
    }
}
