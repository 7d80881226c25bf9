//! Relationship graph.
//!
//! Arena-style: entities, edges and per-file adjacency are plain vectors
//! indexed by [`FileId`] and [`EntityId`]. Raw adjacency may be cyclic
//! (two files can reference each other); only REVISION_OF chains are checked
//! for cycles, and a cycle is reported rather than resolved.

pub mod cluster;
pub mod edges;

use crate::catalog::{Catalog, FileId};
use crate::context::RunContext;
use crate::conventions::Recognition;
use crate::error::Warning;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use tracing::info;

/// Arena index of a project entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub usize);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// An inferred logical project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEntity {
    pub id: EntityId,
    /// Normalized identifier; `None` for Unassigned entities.
    pub identifier: Option<String>,
    pub label: String,
    /// Year of the earliest member modification time.
    pub origin_year: i32,
    /// Containing folder of the first-seen member.
    pub first_folder: PathBuf,
    /// Members in scan order.
    pub members: Vec<FileId>,
    pub unassigned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    SameProject,
    /// From the older to the newer revision.
    RevisionOf,
    /// From the referenced file to the file naming it.
    ReferencedBy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub source: FileId,
    pub target: FileId,
    pub kind: EdgeKind,
}

/// Files of one entity that are revisions of the same artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionGroup {
    pub entity: EntityId,
    /// Normalized base name without revision markers, plus extension.
    pub key: String,
    /// Members in scan order.
    pub members: Vec<FileId>,
    /// Oldest to newest; `None` when the revisions form a cycle.
    pub chain: Option<Vec<FileId>>,
}

impl RevisionGroup {
    pub fn is_consistent(&self) -> bool {
        self.chain.is_some()
    }
}

/// The project graph of an archive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipGraph {
    entities: Vec<ProjectEntity>,
    file_entity: Vec<EntityId>,
    edges: Vec<RelationshipEdge>,
    /// Edge indices touching each file.
    adjacency: Vec<Vec<usize>>,
    revision_groups: Vec<RevisionGroup>,
    /// Revision group index of each file, if any.
    file_group: Vec<Option<usize>>,
}

impl RelationshipGraph {
    /// Build the graph for a recognized catalog.
    pub fn build(catalog: &Catalog, recognition: &Recognition, ctx: &mut RunContext) -> Self {
        let (entities, file_entity) = cluster::cluster(catalog, recognition);

        let mut all_edges: Vec<RelationshipEdge> = Vec::new();
        for entity in &entities {
            if let Some((&hub, rest)) = entity.members.split_first() {
                all_edges.extend(rest.iter().map(|&other| RelationshipEdge {
                    source: hub,
                    target: other,
                    kind: EdgeKind::SameProject,
                }));
            }
        }

        let (revision_groups, revision_edges) =
            edges::revision_groups(catalog, recognition, &entities);
        all_edges.extend(revision_edges);
        all_edges.extend(edges::reference_edges(catalog, &revision_groups));

        for group in revision_groups.iter().filter(|g| !g.is_consistent()) {
            ctx.warn(Warning::RevisionInconsistency {
                files: group
                    .members
                    .iter()
                    .filter_map(|f| catalog.get(*f).map(|r| r.source_path.clone()))
                    .collect(),
                message: format!("revision cycle in artifact '{}'", group.key),
            });
        }

        let mut seen = HashSet::new();
        all_edges.retain(|e| seen.insert(*e));

        let mut adjacency = vec![Vec::new(); catalog.len()];
        for (index, edge) in all_edges.iter().enumerate() {
            adjacency[edge.source.0].push(index);
            if edge.target != edge.source {
                adjacency[edge.target.0].push(index);
            }
        }

        let mut file_group = vec![None; catalog.len()];
        for (index, group) in revision_groups.iter().enumerate() {
            for file in &group.members {
                file_group[file.0] = Some(index);
            }
        }

        let graph = Self {
            entities,
            file_entity,
            edges: all_edges,
            adjacency,
            revision_groups,
            file_group,
        };
        info!(
            "Built graph: {} entities ({} unassigned), {} edges, {} revision groups",
            graph.entities.len(),
            graph.entities.iter().filter(|e| e.unassigned).count(),
            graph.edges.len(),
            graph.revision_groups.len()
        );
        graph
    }

    pub fn entities(&self) -> &[ProjectEntity] {
        &self.entities
    }

    pub fn entity(&self, id: EntityId) -> Option<&ProjectEntity> {
        self.entities.get(id.0)
    }

    pub fn entity_of(&self, file: FileId) -> Option<EntityId> {
        self.file_entity.get(file.0).copied()
    }

    pub fn edges(&self) -> &[RelationshipEdge] {
        &self.edges
    }

    pub fn edges_of_kind(&self, kind: EdgeKind) -> impl Iterator<Item = &RelationshipEdge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }

    /// Edges with the file at either end.
    pub fn edges_of(&self, file: FileId) -> impl Iterator<Item = &RelationshipEdge> {
        self.adjacency
            .get(file.0)
            .into_iter()
            .flatten()
            .filter_map(|&i| self.edges.get(i))
    }

    pub fn revision_groups(&self) -> &[RevisionGroup] {
        &self.revision_groups
    }

    /// Groups whose revisions could not be ordered.
    pub fn inconsistencies(&self) -> impl Iterator<Item = &RevisionGroup> {
        self.revision_groups.iter().filter(|g| !g.is_consistent())
    }

    /// Whether an edge lies inside a revision group that has a cycle.
    pub fn in_revision_cycle(&self, edge: &RelationshipEdge) -> bool {
        edge.kind == EdgeKind::RevisionOf
            && matches!(
                (self.file_group.get(edge.source.0), self.file_group.get(edge.target.0)),
                (Some(Some(a)), Some(Some(b))) if a == b && !self.revision_groups[*a].is_consistent()
            )
    }
}
