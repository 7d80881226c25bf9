//! Transformation planner.
//!
//! Maps every catalogued file to exactly one target path relative to the
//! target root. Project codes are assigned in ascending origin year, then
//! first-seen folder, so identical input always yields identical codes.
//! Target collisions are resolved with a `_DUP{n}` suffix and recorded as
//! warnings; only malformed rules fail planning.

pub mod describe;
pub mod rules;
pub mod template;

pub use rules::{CategoryRule, CompiledRules, TransformationRules};
pub use template::{NamingTemplate, SlotValues, TemplateSlot};

use crate::catalog::{Catalog, FileId, FileRecord};
use crate::config::AppConfig;
use crate::context::RunContext;
use crate::conventions::Recognition;
use crate::error::Warning;
use crate::graph::{EntityId, RelationshipGraph};
use crate::naming;
use crate::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};

static COLLISION_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_DUP\d+(\.[^.]*)?$").expect("collision regex is valid"));

/// Remove a `_DUP{n}` collision suffix from a planned file name.
pub fn strip_collision_suffix(file_name: &str) -> String {
    COLLISION_SUFFIX.replace(file_name, "$1").to_string()
}

/// One planned source → target mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub file: FileId,
    /// Absolute source path.
    pub source: PathBuf,
    /// Target path relative to the target root.
    pub target: PathBuf,
    pub entity: EntityId,
    pub project_code: String,
    pub category: String,
    pub sequence: u32,
    pub revision: u32,
}

/// The folder and code given to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectAssignment {
    pub entity: EntityId,
    pub code: String,
    pub label: String,
    pub origin_year: i32,
    /// Project folder relative to the target root.
    pub folder: PathBuf,
    pub unassigned: bool,
    pub file_count: usize,
}

/// The finalized mapping, ordered by scan order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub format_version: u32,
    pub source_root: PathBuf,
    pub projects: Vec<ProjectAssignment>,
    pub entries: Vec<PlanEntry>,
    /// SHA-256 over every source/target pair.
    pub fingerprint: String,
}

impl MigrationPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry_for(&self, file: FileId) -> Option<&PlanEntry> {
        self.entries
            .binary_search_by_key(&file, |e| e.file)
            .ok()
            .and_then(|i| self.entries.get(i))
    }

    pub fn project(&self, entity: EntityId) -> Option<&ProjectAssignment> {
        self.projects.iter().find(|p| p.entity == entity)
    }

    /// Every directory the plan needs, parents before children.
    pub fn directories(&self) -> Vec<PathBuf> {
        let mut dirs = BTreeSet::new();
        for entry in &self.entries {
            let mut current = entry.target.parent();
            while let Some(dir) = current {
                if dir.as_os_str().is_empty() {
                    break;
                }
                dirs.insert(dir.to_path_buf());
                current = dir.parent();
            }
        }
        let mut dirs: Vec<PathBuf> = dirs.into_iter().collect();
        dirs.sort_by_key(|d| (d.components().count(), d.clone()));
        dirs
    }

    fn compute_fingerprint(entries: &[PlanEntry]) -> String {
        let mut hasher = Sha256::new();
        for entry in entries {
            hasher.update(entry.source.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(entry.target.to_string_lossy().as_bytes());
            hasher.update([b'\n']);
        }
        hex::encode(hasher.finalize())
    }
}

/// Builds migration plans from a rule set.
#[derive(Debug, Clone)]
pub struct Planner {
    rules: CompiledRules,
}

impl Planner {
    /// Compile the rules. Malformed rules fail here, before any analysis.
    pub fn new(rules: &TransformationRules) -> Result<Self> {
        Ok(Self {
            rules: rules.compile()?,
        })
    }

    pub fn rules(&self) -> &CompiledRules {
        &self.rules
    }

    pub fn plan(
        &self,
        catalog: &Catalog,
        recognition: &Recognition,
        graph: &RelationshipGraph,
        ctx: &mut RunContext,
    ) -> Result<MigrationPlan> {
        let projects = self.assign_projects(graph, ctx);
        let project_of: HashMap<EntityId, &ProjectAssignment> =
            projects.iter().map(|p| (p.entity, p)).collect();

        let revisions = self.revision_values(catalog, recognition, graph);
        let categories: Vec<usize> = catalog.iter().map(|r| self.rules.classify(r)).collect();
        let sequences = self.sequence_numbers(catalog, graph, &categories, &revisions);

        let mut taken: HashSet<String> = HashSet::new();
        let mut entries = Vec::with_capacity(catalog.len());
        for record in catalog.iter() {
            let i = record.id.0;
            let Some(entity_id) = graph.entity_of(record.id) else {
                continue;
            };
            let Some(project) = project_of.get(&entity_id) else {
                continue;
            };
            let Some(category) = self.rules.category(categories[i]) else {
                continue;
            };

            let identifier_words = identifier_words(graph, entity_id, recognition, record);
            let identifier_refs: Vec<&str> = identifier_words.iter().map(String::as_str).collect();
            let description = describe::describe(
                &record.stem,
                &identifier_refs,
                &category.rule.default_description,
                self.rules.rules.description_max_len,
            );
            let ext: String = record
                .extension
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .collect();
            let values = SlotValues {
                project_code: project.code.clone(),
                category_tag: category.rule.tag.clone(),
                sequence: format!(
                    "{:0width$}",
                    sequences[i],
                    width = self.rules.rules.sequence_digits
                ),
                description,
                revision: self.rules.format_revision(revisions[i]),
                ext,
                ..Default::default()
            };
            let mut file_name = category.template.render(&values);
            if file_name.ends_with('.') {
                file_name.pop();
            }
            let file_name = naming::sanitize_component(&file_name);

            let dir = project.folder.join(&category.folder);
            let wanted = normalize_relative(&dir.join(&file_name));
            let target = claim_target(&mut taken, &dir, &file_name);
            if target != wanted {
                ctx.warn(Warning::PlanningCollision {
                    source: record.source_path.clone(),
                    wanted: wanted.clone(),
                    assigned: target.clone(),
                });
            }
            debug!("Planned {} -> {}", record.relative_path.display(), target.display());

            entries.push(PlanEntry {
                file: record.id,
                source: record.source_path.clone(),
                target,
                entity: entity_id,
                project_code: project.code.clone(),
                category: category.rule.name.clone(),
                sequence: sequences[i],
                revision: revisions[i],
            });
        }

        let fingerprint = MigrationPlan::compute_fingerprint(&entries);
        info!(
            "Planned {} files into {} projects (fingerprint {})",
            entries.len(),
            projects.len(),
            &fingerprint[..12]
        );
        Ok(MigrationPlan {
            format_version: AppConfig::FORMAT_VERSION,
            source_root: catalog.root().to_path_buf(),
            projects,
            entries,
            fingerprint,
        })
    }

    /// Codes and folders for every entity.
    fn assign_projects(&self, graph: &RelationshipGraph, ctx: &mut RunContext) -> Vec<ProjectAssignment> {
        let rules = &self.rules.rules;
        let mut order: Vec<_> = graph.entities().iter().collect();
        order.sort_by(|a, b| {
            (a.origin_year, &a.first_folder, a.id).cmp(&(b.origin_year, &b.first_folder, b.id))
        });

        order
            .into_iter()
            .map(|entity| {
                let (prefix, root) = if entity.unassigned {
                    (&rules.unassigned_prefix, &self.rules.unassigned_root)
                } else {
                    (&rules.project_prefix, &self.rules.projects_root)
                };
                let code = ctx.next_code(prefix, rules.code_digits);
                let folder_name = self.rules.folder_template.render(&SlotValues {
                    project_code: code.clone(),
                    label: entity.label.clone(),
                    year: entity.origin_year.to_string(),
                    ..Default::default()
                });
                ProjectAssignment {
                    entity: entity.id,
                    code,
                    label: entity.label.clone(),
                    origin_year: entity.origin_year,
                    folder: normalize_relative(&root.join(naming::sanitize_component(&folder_name))),
                    unassigned: entity.unassigned,
                    file_count: entity.members.len(),
                }
            })
            .collect()
    }

    /// Revision number emitted for each file.
    ///
    /// A consistent chain keeps its parsed revisions when they strictly
    /// increase, else takes chain positions. Other files keep their parsed
    /// revision, default 1.
    fn revision_values(
        &self,
        catalog: &Catalog,
        recognition: &Recognition,
        graph: &RelationshipGraph,
    ) -> Vec<u32> {
        let mut values: Vec<u32> = catalog
            .iter()
            .map(|r| recognition.revision(r.id).map(|rev| rev.major).unwrap_or(1))
            .collect();

        for group in graph.revision_groups() {
            let Some(chain) = &group.chain else {
                continue;
            };
            let parsed: Vec<Option<u32>> = chain
                .iter()
                .map(|f| recognition.revision(*f).map(|r| r.major))
                .collect();
            let strictly_increasing = parsed.iter().all(Option::is_some)
                && parsed.windows(2).all(|w| w[0] < w[1]);
            if !strictly_increasing {
                for (position, file) in chain.iter().enumerate() {
                    values[file.0] = position as u32 + 1;
                }
            }
        }
        values
    }

    /// Running number per (entity, category) in ascending
    /// (revision, modification time, scan order).
    fn sequence_numbers(
        &self,
        catalog: &Catalog,
        graph: &RelationshipGraph,
        categories: &[usize],
        revisions: &[u32],
    ) -> Vec<u32> {
        let mut buckets: HashMap<(EntityId, usize), Vec<&FileRecord>> = HashMap::new();
        for record in catalog.iter() {
            if let Some(entity) = graph.entity_of(record.id) {
                buckets
                    .entry((entity, categories[record.id.0]))
                    .or_default()
                    .push(record);
            }
        }

        let mut sequences = vec![0u32; catalog.len()];
        for files in buckets.values_mut() {
            files.sort_by_key(|r| (revisions[r.id.0], r.modified, r.id));
            for (position, record) in files.iter().enumerate() {
                sequences[record.id.0] = position as u32 + 1;
            }
        }
        sequences
    }
}

/// Words to strip from descriptions: the entity identifier and the file's
/// own project token.
fn identifier_words(
    graph: &RelationshipGraph,
    entity: EntityId,
    recognition: &Recognition,
    record: &FileRecord,
) -> Vec<String> {
    let mut words: Vec<String> = graph
        .entity(entity)
        .and_then(|e| e.identifier.as_ref())
        .map(|id| id.split('_').map(str::to_string).collect())
        .unwrap_or_default();
    if let Some(own) = recognition.project_identifier(record.id) {
        words.extend(own.split('_').map(str::to_string));
    }
    words
}

/// Drop `.` components so `Projects/P001/./a.dwg` plans as `Projects/P001/a.dwg`.
fn normalize_relative(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}

/// Claim a case-insensitively unique target, appending `_DUP{n}` from 2.
fn claim_target(taken: &mut HashSet<String>, dir: &Path, file_name: &str) -> PathBuf {
    let (stem, ext) = match file_name.rfind('.') {
        Some(dot) if dot > 0 => (&file_name[..dot], &file_name[dot..]),
        _ => (file_name, ""),
    };
    let mut candidate = normalize_relative(&dir.join(file_name));
    let mut n = 2;
    while !taken.insert(candidate.to_string_lossy().to_lowercase()) {
        candidate = normalize_relative(&dir.join(format!("{}_DUP{}{}", stem, n, ext)));
        n += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conventions::Recognizer;
    use crate::ModernizerError;
    use chrono::{TimeZone, Utc};

    fn plan_for(
        paths: &[(&str, i32, u32)],
        rules: &TransformationRules,
    ) -> (Catalog, MigrationPlan, RunContext) {
        let catalog = Catalog::from_listing(
            "/archive",
            paths.iter().map(|(p, year, day)| {
                (
                    PathBuf::from(p),
                    1,
                    Utc.with_ymd_and_hms(*year, 1, *day, 0, 0, 0).unwrap(),
                )
            }),
        );
        let mut ctx = RunContext::new();
        let recognition = Recognizer::default().recognize(&catalog, &mut ctx);
        let graph = RelationshipGraph::build(&catalog, &recognition, &mut ctx);
        let plan = Planner::new(rules)
            .unwrap()
            .plan(&catalog, &recognition, &graph, &mut ctx)
            .unwrap();
        (catalog, plan, ctx)
    }

    fn target(plan: &MigrationPlan, i: usize) -> String {
        plan.entries[i].target.to_string_lossy().replace('\\', "/")
    }

    #[test]
    fn test_beta_scenario() {
        let (_, plan, ctx) = plan_for(
            &[
                ("2015_ProjectAlpha_Rev3/alpha_calculations.txt", 2015, 3),
                ("ProjectBeta_2016/Beta_Assembly_R1.dwg", 2016, 1),
                ("ProjectBeta_2016/Beta_Assembly_R2.dwg", 2016, 9),
                ("ProjectBeta_2016/ProjectBeta_Specifications_Final.pdf", 2016, 5),
            ],
            &TransformationRules::default(),
        );
        assert_eq!(plan.projects.len(), 2);
        assert_eq!(plan.projects[1].code, "P002");
        assert_eq!(plan.projects[1].origin_year, 2016);
        assert_eq!(
            target(&plan, 1),
            "Projects/P002_Beta_2016/Drawings/P002-ASM-001_MainAssembly_R1.dwg"
        );
        assert_eq!(
            target(&plan, 2),
            "Projects/P002_Beta_2016/Drawings/P002-ASM-002_MainAssembly_R2.dwg"
        );
        assert_eq!(
            target(&plan, 3),
            "Projects/P002_Beta_2016/Documentation/P002-SPEC-001_Specifications_R1.pdf"
        );
        assert!(ctx.warnings().is_empty());
    }

    #[test]
    fn test_codes_follow_origin_year_then_folder() {
        let (_, plan, _) = plan_for(
            &[
                ("Zulu/a.txt", 2014, 1),
                ("Beta/b.txt", 2016, 1),
                ("Alpha/c.txt", 2016, 1),
            ],
            &TransformationRules::default(),
        );
        let code_of = |label: &str| {
            plan.projects
                .iter()
                .find(|p| p.label == label)
                .map(|p| p.code.clone())
                .unwrap()
        };
        assert_eq!(code_of("Zulu"), "P001");
        assert_eq!(code_of("Alpha"), "P002");
        assert_eq!(code_of("Beta"), "P003");
    }

    #[test]
    fn test_unassigned_use_their_own_prefix_and_root() {
        let (_, plan, _) = plan_for(
            &[("MiscFiles/random_calc.xlsx", 2017, 1), ("Gamma/g.txt", 2017, 1)],
            &TransformationRules::default(),
        );
        assert_eq!(
            target(&plan, 0),
            "Unassigned/U001_MiscFiles_2017/BOM/U001-DATA-001_RandomCalc_R1.xlsx"
        );
        assert!(target(&plan, 1).starts_with("Projects/P001_Gamma_2017/"));
    }

    #[test]
    fn test_chain_positions_replace_non_increasing_revisions() {
        let (_, plan, _) = plan_for(
            &[
                ("Alpha/DWG_MainAssembly_FINAL.dwg", 2015, 1),
                ("Alpha/DWG_MainAssembly_v2.dwg", 2015, 5),
            ],
            &TransformationRules::default(),
        );
        // Chain: FINAL (older, no revision) then v2.
        assert_eq!(plan.entries[0].revision, 1);
        assert_eq!(plan.entries[1].revision, 2);
        assert!(plan.entries[0].sequence < plan.entries[1].sequence);
    }

    #[test]
    fn test_parsed_revisions_kept_when_increasing() {
        let (_, plan, _) = plan_for(
            &[
                ("Alpha/DWG_MainAssembly_v2_FINAL.dwg", 2015, 1),
                ("Alpha/DWG_MainAssembly_v3_ACTUALFINAL.dwg", 2015, 5),
            ],
            &TransformationRules::default(),
        );
        assert_eq!(plan.entries[0].revision, 2);
        assert_eq!(plan.entries[1].revision, 3);
        assert!(target(&plan, 1).ends_with("P001-ASM-002_Main_R3.dwg"));
    }

    #[test]
    fn test_collision_gets_dup_suffix() {
        let mut rules = TransformationRules::default();
        rules.filename_template = "{project_code}-{sequence}_{description}.{ext}".into();
        rules.categories[0].tag = "DWG".into();
        rules.categories[1].tag = "DWG".into();
        let (_, plan, ctx) = plan_for(
            &[
                ("Beta_FINAL/Beta_Main_Frame.dwg", 2016, 1),
                ("beta_v2/Beta_Frame.dwg", 2016, 2),
            ],
            &rules,
        );
        assert_eq!(plan.projects.len(), 1);
        assert_eq!(target(&plan, 0), "Projects/P001_Beta_2016/Drawings/P001-001_MainFrame.dwg");
        assert_eq!(target(&plan, 1), "Projects/P001_Beta_2016/Drawings/P001-001_Frame.dwg");

        let mut rules = TransformationRules::default();
        rules.filename_template = "{project_code}-{sequence}.{ext}".into();
        let (_, plan, ctx2) = plan_for(
            &[
                ("Beta_FINAL/Beta_Main_Frame.dwg", 2016, 1),
                ("beta_v2/Beta_Frame.dwg", 2016, 2),
            ],
            &rules,
        );
        assert_eq!(target(&plan, 0), "Projects/P001_Beta_2016/Drawings/P001-001.dwg");
        assert_eq!(target(&plan, 1), "Projects/P001_Beta_2016/Drawings/P001-001_DUP2.dwg");
        assert!(ctx.warnings().is_empty());
        assert_eq!(
            ctx2.warnings()
                .iter()
                .filter(|w| w.kind() == "planning_collision")
                .count(),
            1
        );
    }

    #[test]
    fn test_plan_covers_every_file_with_unique_targets() {
        let (catalog, plan, _) = plan_for(
            &[
                ("a/x.dwg", 2015, 1),
                ("a/X.DWG", 2015, 1),
                ("b/x.dwg", 2015, 1),
                ("notes.txt", 2015, 1),
                ("more notes.txt", 2015, 1),
            ],
            &TransformationRules::default(),
        );
        assert_eq!(plan.len(), catalog.len());
        let unique: HashSet<String> = plan
            .entries
            .iter()
            .map(|e| e.target.to_string_lossy().to_lowercase())
            .collect();
        assert_eq!(unique.len(), plan.len());
        assert!(plan.entries.iter().all(|e| e.target.is_relative()));
    }

    #[test]
    fn test_directories_parents_first() {
        let (_, plan, _) = plan_for(&[("Gamma/g.txt", 2017, 1)], &TransformationRules::default());
        let dirs: Vec<String> = plan
            .directories()
            .iter()
            .map(|d| d.to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(
            dirs,
            vec![
                "Projects",
                "Projects/P001_Gamma_2017",
                "Projects/P001_Gamma_2017/Documentation"
            ]
        );
    }

    #[test]
    fn test_malformed_rules_fail_before_planning() {
        let mut rules = TransformationRules::default();
        rules.filename_template = "{project_code}.{ext}".into();
        assert!(matches!(
            Planner::new(&rules),
            Err(ModernizerError::UnresolvableRule { .. })
        ));
    }

    #[test]
    fn test_strip_collision_suffix() {
        assert_eq!(strip_collision_suffix("P001-001_DUP2.dwg"), "P001-001.dwg");
        assert_eq!(strip_collision_suffix("P001-001_DUP12"), "P001-001");
        assert_eq!(strip_collision_suffix("P001-001.dwg"), "P001-001.dwg");
    }
}
