//! Project clustering: union-find over shared identifiers and folders.

use super::{EntityId, ProjectEntity};
use crate::catalog::{Catalog, FileId, FileRecord};
use crate::conventions::{tokenizer, Recognition};
use crate::naming::{self, FolderIdentity};
use chrono::Datelike;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Disjoint-set forest with path halving and union by size.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }
}

/// Resolve the project identifier of one file: the matched PROJECT_ID token,
/// else the first identifying folder component. Orphan folders yield none.
pub fn file_identifier(record: &FileRecord, recognition: &Recognition) -> Option<String> {
    if let Some(id) = recognition.project_identifier(record.id) {
        return Some(id);
    }
    for component in record.folder_components() {
        match naming::folder_identity(&component) {
            FolderIdentity::Project(id) => return Some(id),
            FolderIdentity::Orphan => return None,
            FolderIdentity::Empty => continue,
        }
    }
    None
}

/// Cluster the catalog into project entities, in first-seen order.
///
/// Returns the entities and the entity of every file.
pub fn cluster(catalog: &Catalog, recognition: &Recognition) -> (Vec<ProjectEntity>, Vec<EntityId>) {
    let n = catalog.len();
    let identifiers: Vec<Option<String>> = catalog
        .iter()
        .map(|r| file_identifier(r, recognition))
        .collect();

    let pattern_ids: Vec<Option<String>> = catalog
        .iter()
        .map(|r| recognition.project_identifier(r.id))
        .collect();
    let mut pattern_ids_by_folder: HashMap<&PathBuf, HashSet<&str>> = HashMap::new();
    for record in catalog.iter() {
        if let Some(id) = pattern_ids[record.id.0].as_deref() {
            pattern_ids_by_folder.entry(&record.folder).or_default().insert(id);
        }
    }

    let mut sets = UnionFind::new(n);
    let mut first_by_identifier: HashMap<&str, usize> = HashMap::new();
    let mut first_by_folder: HashMap<&PathBuf, usize> = HashMap::new();

    for record in catalog.iter() {
        let i = record.id.0;
        if let Some(id) = identifiers[i].as_deref() {
            match first_by_identifier.get(id) {
                Some(&j) => sets.union(i, j),
                None => {
                    first_by_identifier.insert(id, i);
                }
            }
        }
        // A folder mixing several naming-pattern projects does not merge
        // them; each such file follows its own identifier instead.
        let conflicted = pattern_ids_by_folder
            .get(&record.folder)
            .is_some_and(|ids| ids.len() > 1);
        if conflicted && pattern_ids[i].is_some() {
            continue;
        }
        if !record.is_root_level() {
            match first_by_folder.get(&record.folder) {
                Some(&j) => sets.union(i, j),
                None => {
                    first_by_folder.insert(&record.folder, i);
                }
            }
        }
    }

    let mut entity_of_root: HashMap<usize, EntityId> = HashMap::new();
    let mut members: Vec<Vec<FileId>> = Vec::new();
    let mut file_entity = Vec::with_capacity(n);
    for record in catalog.iter() {
        let root = sets.find(record.id.0);
        let entity = *entity_of_root.entry(root).or_insert_with(|| {
            members.push(Vec::new());
            EntityId(members.len() - 1)
        });
        members[entity.0].push(record.id);
        file_entity.push(entity);
    }

    let entities = members
        .into_iter()
        .enumerate()
        .filter_map(|(index, files)| {
            let records: Vec<&FileRecord> = files.iter().filter_map(|f| catalog.get(*f)).collect();
            let first = records.first()?;
            let identifier = dominant_identifier(&files, &identifiers);
            let label = match &identifier {
                Some(id) => naming::label_for(id),
                None => unassigned_label(first),
            };
            let origin_year = records
                .iter()
                .map(|r| r.modified)
                .min()
                .map(|t| t.year())
                .unwrap_or_default();
            Some(ProjectEntity {
                id: EntityId(index),
                unassigned: identifier.is_none(),
                identifier,
                label,
                origin_year,
                first_folder: first.folder.clone(),
                members: files,
            })
        })
        .collect();

    (entities, file_entity)
}

/// The most frequent identifier among members; ties go to the first seen.
fn dominant_identifier(files: &[FileId], identifiers: &[Option<String>]) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for file in files {
        if let Some(id) = identifiers[file.0].as_deref() {
            match counts.iter_mut().find(|(seen, _)| *seen == id) {
                Some((_, count)) => *count += 1,
                None => counts.push((id, 1)),
            }
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (id, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((id, count));
        }
    }
    best.map(|(id, _)| id.to_string())
}

fn unassigned_label(first: &FileRecord) -> String {
    match first.folder.file_name() {
        Some(name) => {
            let words = tokenizer::split_words(&name.to_string_lossy());
            let label = naming::title_case(&words);
            if label.is_empty() {
                "Unassigned".to_string()
            } else {
                label
            }
        }
        None => "Unassigned".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::conventions::Recognizer;
    use chrono::{TimeZone, Utc};

    fn build(paths: &[(&str, i32)]) -> (Catalog, Vec<ProjectEntity>, Vec<EntityId>) {
        let catalog = Catalog::from_listing(
            "/archive",
            paths.iter().map(|(p, year)| {
                (
                    PathBuf::from(p),
                    1,
                    Utc.with_ymd_and_hms(*year, 6, 1, 0, 0, 0).unwrap(),
                )
            }),
        );
        let recognition = Recognizer::default().recognize(&catalog, &mut RunContext::new());
        let (entities, file_entity) = cluster(&catalog, &recognition);
        (catalog, entities, file_entity)
    }

    #[test]
    fn test_union_find() {
        let mut uf = UnionFind::new(4);
        uf.union(0, 1);
        uf.union(2, 3);
        assert_eq!(uf.find(0), uf.find(1));
        assert_ne!(uf.find(1), uf.find(2));
        uf.union(1, 3);
        assert_eq!(uf.find(0), uf.find(2));
    }

    #[test]
    fn test_folder_clusters_into_one_project() {
        let (_, entities, file_entity) = build(&[
            ("ProjectBeta_2016/Beta_Assembly_R1.dwg", 2016),
            ("ProjectBeta_2016/Beta_Assembly_R2.dwg", 2017),
            ("ProjectBeta_2016/ProjectBeta_Specifications_Final.pdf", 2016),
        ]);
        assert_eq!(entities.len(), 1);
        let beta = &entities[0];
        assert_eq!(beta.identifier.as_deref(), Some("beta"));
        assert_eq!(beta.label, "Beta");
        assert_eq!(beta.origin_year, 2016);
        assert!(!beta.unassigned);
        assert!(file_entity.iter().all(|e| *e == EntityId(0)));
    }

    #[test]
    fn test_same_identifier_merges_across_folders() {
        let (_, entities, _) = build(&[
            ("Beta_FINAL/Assembly.dwg", 2016),
            ("beta_v2/Assembly.dwg", 2018),
        ]);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].members.len(), 2);
    }

    #[test]
    fn test_root_files_without_identifier_stay_apart() {
        let (_, entities, _) = build(&[("notes.txt", 2015), ("calc.xlsx", 2016)]);
        assert_eq!(entities.len(), 2);
        assert!(entities.iter().all(|e| e.unassigned && e.members.len() == 1));
        assert_eq!(entities[0].label, "Unassigned");
    }

    #[test]
    fn test_orphan_folder_is_unassigned_but_clustered() {
        let (_, entities, _) = build(&[
            ("MiscFiles/old_template.dwg", 2015),
            ("MiscFiles/random_calc.xlsx", 2016),
            ("TempFolder/temp_assembly_test.dwg", 2017),
        ]);
        assert_eq!(entities.len(), 2);
        assert!(entities[0].unassigned);
        assert_eq!(entities[0].members.len(), 2);
        assert_eq!(entities[0].label, "MiscFiles");
        assert!(entities[1].unassigned);
    }

    #[test]
    fn test_shared_folder_keeps_pattern_projects_apart() {
        let (catalog, entities, file_entity) = build(&[
            ("Delta/DEL_001_Frame.dwg", 2018),
            ("Delta/DEL_002_Bracket.dwg", 2018),
            ("Delta/DEL_003_Housing.dwg", 2018),
            ("Gamma/GAM_001_Frame.dwg", 2019),
            ("Gamma/GAM_002_Bracket.dwg", 2019),
            ("Gamma/GAM_003_Housing.dwg", 2019),
            ("Incoming/DEL_004_Cover.dwg", 2020),
            ("Incoming/GAM_004_Cover.dwg", 2020),
        ]);
        assert_eq!(entities.len(), 2);
        let ids: Vec<_> = entities.iter().map(|e| e.identifier.as_deref()).collect();
        assert_eq!(ids, vec![Some("del"), Some("gam")]);
        assert!(entities.iter().all(|e| e.members.len() == 4));

        let entity_of = |name: &str| {
            catalog
                .iter()
                .find(|r| r.file_name == name)
                .map(|r| file_entity[r.id.0])
        };
        assert_eq!(entity_of("DEL_004_Cover.dwg"), entity_of("DEL_001_Frame.dwg"));
        assert_eq!(entity_of("GAM_004_Cover.dwg"), entity_of("GAM_001_Frame.dwg"));
    }

    #[test]
    fn test_nested_year_folder_uses_inner_name() {
        let (_, entities, _) = build(&[
            ("2018Projects/Delta_Project/DEL-ASM-001.dwg", 2018),
            ("2018Projects/Delta_Project/delta_design_notes.txt", 2018),
        ]);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].identifier.as_deref(), Some("delta"));
    }
}
