//! Revision chains and cross-file references.

use super::{EdgeKind, EntityId, ProjectEntity, RelationshipEdge, RevisionGroup};
use crate::catalog::{Catalog, FileId, FileRecord};
use crate::conventions::{tokenizer, Recognition, Revision};
use crate::naming;
use std::collections::{BTreeSet, HashMap};

/// Normalized words of a file name with revision and noise words removed.
pub fn normalized_words(record: &FileRecord) -> Vec<String> {
    tokenizer::split_words(&record.stem)
        .into_iter()
        .map(|w| w.to_lowercase())
        .filter(|w| !naming::is_noise_word(w))
        .collect()
}

/// Artifact key: normalized words plus extension.
fn artifact_key(record: &FileRecord) -> String {
    format!("{}.{}", normalized_words(record).join("_"), record.extension)
}

/// `Less` when `a` is an older revision than `b`; `None` when incomparable.
fn compare_revisions(
    a: (&FileRecord, Option<Revision>),
    b: (&FileRecord, Option<Revision>),
) -> Option<std::cmp::Ordering> {
    use std::cmp::Ordering;
    if let (Some(ra), Some(rb)) = (a.1, b.1) {
        if ra != rb {
            return Some(ra.cmp(&rb));
        }
    }
    match a.0.modified.cmp(&b.0.modified) {
        Ordering::Equal => None,
        other => Some(other),
    }
}

/// Group each entity's files into artifacts and order each group.
///
/// A group that orders cleanly contributes its consecutive chain edges; a
/// group with a cycle keeps every raw pairwise edge and has no chain.
pub fn revision_groups(
    catalog: &Catalog,
    recognition: &Recognition,
    entities: &[ProjectEntity],
) -> (Vec<RevisionGroup>, Vec<RelationshipEdge>) {
    let mut groups = Vec::new();
    let mut edges = Vec::new();

    for entity in entities {
        let mut order: Vec<String> = Vec::new();
        let mut by_key: HashMap<String, Vec<FileId>> = HashMap::new();
        for &file in &entity.members {
            let Some(record) = catalog.get(file) else {
                continue;
            };
            let key = artifact_key(record);
            by_key
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(file);
        }

        for key in order {
            let members = by_key.remove(&key).unwrap_or_default();
            if members.len() < 2 {
                continue;
            }
            let (group, group_edges) = order_group(catalog, recognition, entity.id, key, members);
            edges.extend(group_edges);
            groups.push(group);
        }
    }

    (groups, edges)
}

fn order_group(
    catalog: &Catalog,
    recognition: &Recognition,
    entity: EntityId,
    key: String,
    members: Vec<FileId>,
) -> (RevisionGroup, Vec<RelationshipEdge>) {
    let members: Vec<FileId> = members
        .into_iter()
        .filter(|f| catalog.get(*f).is_some())
        .collect();
    let info: Vec<(&FileRecord, Option<Revision>)> = members
        .iter()
        .filter_map(|f| catalog.get(*f).map(|r| (r, recognition.revision(*f))))
        .collect();
    let n = info.len();

    // before[i] holds every j that i precedes.
    let mut before: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree = vec![0usize; n];
    let mut raw = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            match compare_revisions(info[i], info[j]) {
                Some(std::cmp::Ordering::Less) => {
                    before[i].push(j);
                    indegree[j] += 1;
                    raw.push((i, j));
                }
                Some(std::cmp::Ordering::Greater) => {
                    before[j].push(i);
                    indegree[i] += 1;
                    raw.push((j, i));
                }
                _ => {}
            }
        }
    }

    // Kahn's algorithm; among ready nodes the earliest scanned goes first.
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut sorted = Vec::with_capacity(n);
    while let Some(&next) = ready.iter().next() {
        ready.remove(&next);
        sorted.push(next);
        for &j in &before[next] {
            indegree[j] -= 1;
            if indegree[j] == 0 {
                ready.insert(j);
            }
        }
    }

    let edge = |from: usize, to: usize| RelationshipEdge {
        source: members[from],
        target: members[to],
        kind: EdgeKind::RevisionOf,
    };

    if sorted.len() == n {
        let chain: Vec<FileId> = sorted.iter().map(|&i| members[i]).collect();
        let edges: Vec<RelationshipEdge> = sorted.windows(2).map(|w| edge(w[0], w[1])).collect();
        (
            RevisionGroup {
                entity,
                key,
                members,
                chain: Some(chain),
            },
            edges,
        )
    } else {
        let edges: Vec<RelationshipEdge> = raw.into_iter().map(|(a, b)| edge(a, b)).collect();
        (
            RevisionGroup {
                entity,
                key,
                members,
                chain: None,
            },
            edges,
        )
    }
}

/// Reference key of a file, if distinctive enough to look for elsewhere.
fn reference_key(words: &[String]) -> Option<&[String]> {
    let has_digit = words.iter().any(|w| w.chars().any(|c| c.is_ascii_digit()));
    if (words.len() >= 2 && has_digit) || words.len() >= 3 {
        Some(words)
    } else {
        None
    }
}

/// REFERENCED_BY edges: B is referenced by A when B's key is a contiguous
/// run of A's words and A is not another revision of B.
pub fn reference_edges(catalog: &Catalog, groups: &[RevisionGroup]) -> Vec<RelationshipEdge> {
    let words: Vec<Vec<String>> = catalog.iter().map(normalized_words).collect();

    let mut group_of: HashMap<FileId, usize> = HashMap::new();
    for (index, group) in groups.iter().enumerate() {
        for file in &group.members {
            group_of.insert(*file, index);
        }
    }

    // Keys indexed by their first word.
    let mut keys_by_head: HashMap<&str, Vec<FileId>> = HashMap::new();
    for record in catalog.iter() {
        if let Some(key) = reference_key(&words[record.id.0]) {
            keys_by_head.entry(key[0].as_str()).or_default().push(record.id);
        }
    }

    let mut edges = Vec::new();
    for referrer in catalog.iter() {
        let haystack = &words[referrer.id.0];
        let mut found: BTreeSet<FileId> = BTreeSet::new();
        for start in 0..haystack.len() {
            let Some(candidates) = keys_by_head.get(haystack[start].as_str()) else {
                continue;
            };
            for &referenced in candidates {
                if referenced == referrer.id {
                    continue;
                }
                let same_group = matches!(
                    (group_of.get(&referenced), group_of.get(&referrer.id)),
                    (Some(a), Some(b)) if a == b
                );
                if same_group {
                    continue;
                }
                let key = &words[referenced.0];
                if haystack[start..].starts_with(key) {
                    found.insert(referenced);
                }
            }
        }
        edges.extend(found.into_iter().map(|referenced| RelationshipEdge {
            source: referenced,
            target: referrer.id,
            kind: EdgeKind::ReferencedBy,
        }));
    }
    edges
}
