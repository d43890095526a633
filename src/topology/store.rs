//! Authoritative in-memory topology.
//!
//! The store is reconciled against each fetched snapshot instead of being
//! rebuilt, so renderers can animate the difference:
//!
//! ```text
//! Snapshot ──► reconcile ──► add / update (hash differs) / delete
//!                  │
//!                  ▼ (only when something changed)
//!            derived post-pass: edges, children index, display names
//! ```
//!
//! ## Invariants
//!
//! - Entity ids are unique (keyed map).
//! - An edge `(parent, child)` exists iff both ends are live and the child's
//!   `parent_id` names the parent. Entities whose parent is missing are kept
//!   as orphans with no edge.
//! - Content hash, classification and display name are recomputed whenever
//!   an entity's attributes are replaced; nothing is cached beside them.
//! - Removed ids leave no trace; a later entity with the same id starts fresh.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;

use super::display_name::shrink_display_name;
use super::entity::{Classification, Entity, Snapshot, DEFAULT_ROOT_ID};
use super::hasher::content_hash;

// ---------------------------------------------------------------------------
// Derived types
// ---------------------------------------------------------------------------

/// Derived parent → child relationship between two live entities
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub parent_id: String,
    pub child_id: String,
}

impl Edge {
    pub fn touches(&self, id: &str) -> bool {
        self.parent_id == id || self.child_id == id
    }
}

/// What one reconcile pass did. Ids are in snapshot order for adds and
/// updates, and in id order for removals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl ReconcileReport {
    /// True when any entity was added, updated or removed
    pub fn changed(&self) -> bool {
        !(self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty())
    }

    pub fn total(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }
}

/// Active tallies, kept separate because "is a group active" has no single
/// agreed meaning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCounts {
    /// Entities classified `ActiveLeaf`
    pub active_leaves: usize,
    /// Groups with at least one `ActiveLeaf` somewhere beneath them
    pub active_groups: usize,
}

// ---------------------------------------------------------------------------
// TopologyStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TopologyStore {
    root_id: String,
    entities: BTreeMap<String, Entity>,
    edges: BTreeSet<Edge>,
    /// parent id → child ids, in id order
    children: HashMap<String, Vec<String>>,
    /// Bumped on every reconcile that changed something
    generation: u64,
}

impl Default for TopologyStore {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT_ID)
    }
}

impl TopologyStore {
    pub fn new(root_id: impl Into<String>) -> Self {
        Self {
            root_id: root_id.into(),
            entities: BTreeMap::new(),
            edges: BTreeSet::new(),
            children: HashMap::new(),
            generation: 0,
        }
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Bring the store in line with `snapshot`.
    ///
    /// Unknown ids are added, known ids whose content hash differs are
    /// replaced in place, and ids missing from the snapshot are removed
    /// together with every edge touching them. If a snapshot repeats an id,
    /// the last occurrence wins.
    pub fn reconcile(&mut self, snapshot: Snapshot) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        // A repeated id is applied once, using its last occurrence
        let mut last_index: HashMap<String, usize> = HashMap::with_capacity(snapshot.len());
        for (index, raw) in snapshot.entities.iter().enumerate() {
            last_index.insert(raw.id.clone(), index);
        }

        for (index, raw) in snapshot.entities.into_iter().enumerate() {
            if last_index.get(&raw.id) != Some(&index) {
                continue;
            }
            match self.entities.get_mut(&raw.id) {
                Some(existing) => {
                    if content_hash(&raw.attributes) != existing.content_hash() {
                        let id = raw.id.clone();
                        existing.replace_content(raw, &self.root_id);
                        report.updated.push(id);
                    }
                }
                None => {
                    report.added.push(raw.id.clone());
                    let entity = Entity::from_raw(raw, &self.root_id);
                    self.entities.insert(entity.id().to_string(), entity);
                }
            }
        }

        report.removed = self
            .entities
            .keys()
            .filter(|id| !last_index.contains_key(*id))
            .cloned()
            .collect();
        for id in &report.removed {
            self.entities.remove(id);
        }

        if report.changed() {
            self.rebuild_derived();
            self.generation += 1;
            tracing::debug!(
                added = report.added.len(),
                updated = report.updated.len(),
                removed = report.removed.len(),
                entities = self.entities.len(),
                edges = self.edges.len(),
                generation = self.generation,
                "Topology reconciled"
            );
        }

        report
    }

    /// Recompute edges, the children index and display names in one pass.
    fn rebuild_derived(&mut self) {
        self.edges.clear();
        self.children.clear();

        let mut display_names = Vec::with_capacity(self.entities.len());
        for entity in self.entities.values() {
            let parent = entity
                .parent_id()
                .filter(|p| *p != entity.id())
                .and_then(|p| self.entities.get(p));

            let display = match parent {
                Some(parent) => {
                    self.edges.insert(Edge {
                        parent_id: parent.id().to_string(),
                        child_id: entity.id().to_string(),
                    });
                    self.children
                        .entry(parent.id().to_string())
                        .or_default()
                        .push(entity.id().to_string());

                    if entity.classification().is_container() {
                        entity.name().to_string()
                    } else {
                        shrink_display_name(entity.name(), parent.name())
                    }
                }
                None => entity.name().to_string(),
            };
            display_names.push((entity.id().to_string(), display));
        }

        for (id, display) in display_names {
            if let Some(entity) = self.entities.get_mut(&id) {
                entity.set_display_name(display);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    /// All live entities in id order
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn root(&self) -> Option<&Entity> {
        self.entities.get(&self.root_id)
    }

    /// Live children of a container. Empty when `group_id` is unknown or is
    /// not a Group.
    ///
    /// The Root is also accepted and returns the top-level entities, so a
    /// renderer can walk the whole tree from `root_id()` with this one call.
    pub fn children_of(&self, group_id: &str) -> Vec<&Entity> {
        let is_container = self
            .get(group_id)
            .is_some_and(|e| e.classification().is_container());
        if !is_container {
            return Vec::new();
        }
        self.children
            .get(group_id)
            .map(|ids| ids.iter().filter_map(|id| self.entities.get(id)).collect())
            .unwrap_or_default()
    }

    /// Number of `ActiveLeaf` entities
    pub fn count_active(&self) -> usize {
        self.entities
            .values()
            .filter(|e| e.classification() == Classification::ActiveLeaf)
            .count()
    }

    pub fn active_counts(&self) -> ActiveCounts {
        let mut active_leaves = 0;
        let mut marked: HashSet<&str> = HashSet::new();

        for entity in self.entities.values() {
            if entity.classification() != Classification::ActiveLeaf {
                continue;
            }
            active_leaves += 1;

            // Walk up; stopping at an already-marked ancestor also ends cycles
            let mut current = entity.parent_id();
            while let Some(parent_id) = current {
                let Some(parent) = self.entities.get(parent_id) else {
                    break;
                };
                if !marked.insert(parent.id()) {
                    break;
                }
                current = parent.parent_id();
            }
        }

        let active_groups = marked
            .iter()
            .filter_map(|id| self.entities.get(*id))
            .filter(|e| e.classification() == Classification::Group)
            .count();

        ActiveCounts {
            active_leaves,
            active_groups,
        }
    }

    /// Linear scan
    pub fn filter_by<F>(&self, predicate: F) -> Vec<&Entity>
    where
        F: Fn(&Entity) -> bool,
    {
        self.entities.values().filter(|e| predicate(e)).collect()
    }

    /// Non-root entities without a live parent
    pub fn orphans(&self) -> Vec<&Entity> {
        self.entities
            .values()
            .filter(|e| e.id() != self.root_id)
            .filter(|e| {
                !e.parent_id()
                    .is_some_and(|p| p != e.id() && self.entities.contains_key(p))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
