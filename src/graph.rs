//! Cross-run dependency graph.
//!
//! The build-set builder folds every registered entry into the graph and
//! asks it, during incremental runs, which other entries a change affects.
//! Registrations land in a pending layer first; `commit()` makes them the
//! truth future runs compare against, and `persist()` writes the committed
//! layer to disk so relationships survive process restarts.
//!
//! Relevance reported by [`relevant_entries_for_change`]:
//!
//! - **collection deletions** — entries consuming a collection that lost
//!   members in the pending registration (the changed file dropped a tag, or
//!   vanished entirely);
//! - **transitive dependents** — entries reachable against the recorded
//!   layout/include edges.
//!
//! [`relevant_entries_for_change`]: DependencyGraph::relevant_entries_for_change

use crate::source::SourcePath;
use crate::template::{EntryMeta, TemplateHandle};
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Graph-level errors.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Computing an entry's data cascade failed during registration.
    #[error("data cascade failed for `{path}`")]
    DataCascade {
        path: SourcePath,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to persist dependency graph to `{path}`")]
    Persist {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// Facade over the dependency-relationship store.
///
/// Written to only by the build-set builder, never by concurrent generation
/// tasks, so implementations need no locking beyond their own interior state.
pub trait DependencyGraph: Send + Sync {
    /// Fold one entry into the pending layer.
    ///
    /// Computes (awaits) the handle's data cascade and records its edges and
    /// collection membership; returns the entry metadata derived from it.
    fn register_entry(&self, handle: &Arc<TemplateHandle>) -> Result<EntryMeta, GraphError>;

    /// Record that a path vanished from the source set.
    fn register_removal(&self, path: &SourcePath);

    /// Entries affected by a change to `changed`, per the module docs.
    /// Compares the pending registration of `changed` against the committed
    /// layer; `changed` itself is never part of the result.
    fn relevant_entries_for_change(&self, changed: &SourcePath) -> FxHashSet<SourcePath>;

    /// Make the pending layer the committed truth for future runs.
    fn commit(&self);

    /// Write the committed layer to disk, if this graph is disk-backed.
    fn persist(&self) -> Result<(), GraphError>;
}

// ============================================================================
// Default map-backed implementation
// ============================================================================

/// One entry's recorded relationships.
///
/// BTree containers keep the persisted JSON deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Node {
    /// Layout/include edges to other templates
    deps: BTreeSet<SourcePath>,
    /// Collections this entry is a member of
    provides: BTreeSet<String>,
    /// Collections this entry consumes
    consumes: BTreeSet<String>,
}

/// Map-backed graph with a pending/committed two-layer store.
#[derive(Default)]
pub struct MapGraph {
    store_path: Option<PathBuf>,
    committed: RwLock<BTreeMap<SourcePath, Node>>,
    pending: RwLock<BTreeMap<SourcePath, Node>>,
}

impl MapGraph {
    /// Purely in-memory graph (used by `generate_as_data` and tests).
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Disk-backed graph. Loading is fail-safe: a missing or corrupt store
    /// simply starts empty, the next run rebuilds it.
    pub fn load(store_path: PathBuf) -> Self {
        let committed = std::fs::read_to_string(&store_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            store_path: Some(store_path),
            committed: RwLock::new(committed),
            pending: RwLock::new(BTreeMap::new()),
        }
    }

    /// Transitive dependents of `changed` under the committed dep edges.
    fn dependents_of(&self, changed: &SourcePath) -> FxHashSet<SourcePath> {
        let committed = self.committed.read();
        let mut affected: FxHashSet<SourcePath> = FxHashSet::default();
        let mut frontier = vec![changed.clone()];

        while let Some(current) = frontier.pop() {
            for (path, node) in committed.iter() {
                if path != changed
                    && node.deps.contains(&current)
                    && affected.insert(path.clone())
                {
                    frontier.push(path.clone());
                }
            }
        }
        affected
    }
}

impl DependencyGraph for MapGraph {
    fn register_entry(&self, handle: &Arc<TemplateHandle>) -> Result<EntryMeta, GraphError> {
        let wrap = |source: anyhow::Error| GraphError::DataCascade {
            path: handle.source().clone(),
            source,
        };
        let data = handle.data().map_err(wrap)?;
        let meta = handle.entry_meta().map_err(wrap)?;

        let node = Node {
            deps: handle.template_deps().into_iter().collect(),
            provides: data.tags.iter().cloned().collect(),
            consumes: data.collection.iter().cloned().collect(),
        };
        self.pending.write().insert(handle.source().clone(), node);
        Ok(meta)
    }

    fn register_removal(&self, path: &SourcePath) {
        self.pending.write().insert(path.clone(), Node::default());
    }

    fn relevant_entries_for_change(&self, changed: &SourcePath) -> FxHashSet<SourcePath> {
        let mut affected = self.dependents_of(changed);

        // Collections that lost this entry's membership
        let committed = self.committed.read();
        let pending = self.pending.read();
        let before = committed.get(changed).map(|n| &n.provides);
        let after = pending.get(changed).map(|n| &n.provides);

        if let Some(before) = before {
            let removed: BTreeSet<&String> = before
                .iter()
                .filter(|c| !after.is_some_and(|a| a.contains(*c)))
                .collect();
            if !removed.is_empty() {
                for (path, node) in committed.iter() {
                    if path != changed && node.consumes.iter().any(|c| removed.contains(c)) {
                        affected.insert(path.clone());
                    }
                }
            }
        }

        affected
    }

    fn commit(&self) {
        let mut committed = self.committed.write();
        for (path, node) in std::mem::take(&mut *self.pending.write()) {
            committed.insert(path, node);
        }
    }

    fn persist(&self) -> Result<(), GraphError> {
        let Some(store_path) = &self.store_path else {
            return Ok(());
        };
        let wrap = |source: anyhow::Error| GraphError::Persist {
            path: store_path.clone(),
            source,
        };

        if let Some(parent) = store_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| wrap(e.into()))?;
        }
        let json = serde_json::to_string_pretty(&*self.committed.read())
            .map_err(|e| wrap(e.into()))?;
        std::fs::write(store_path, json).map_err(|e| wrap(e.into()))
    }
}
