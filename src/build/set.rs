//! Build-set construction: the per-run classification policy.
//!
//! For every discovered path the builder decides whether it becomes a build
//! entry, what gets invalidated first, and which entries may serve their
//! stale render cache. The policy, in order:
//!
//! 1. no engine → not a template, ignored entirely;
//! 2. the changed path is a raw-copy asset → every template path is skipped,
//!    a changed asset never triggers template regeneration;
//! 3. the changed template itself was registered before the loop;
//! 4. (before the loop) the changed template's cascade is folded into the
//!    dependency graph so every later relevance check sees it;
//! 5. full runs make an entry per path, with the no-initial-render override
//!    applied per handle age;
//! 6. incremental runs invalidate per relevance: relevant entries lose data
//!    and render caches, untouched entries lose only the data cache and
//!    render from cache.

use super::error::BuildError;
use super::{Counters, RunFlags};
use crate::data::RunData;
use crate::engine::EngineRegistry;
use crate::graph::DependencyGraph;
use crate::passthrough::PassthroughGate;
use crate::source::SourcePath;
use crate::template::{CacheReset, EntryMeta, TemplateCache, TemplateHandle};
use rustc_hash::FxHashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// One run's generation unit. Destroyed at the end of the run.
pub struct BuildEntry {
    pub handle: Arc<TemplateHandle>,
    pub meta: EntryMeta,
    /// Render from the existing cache contents and publish to siblings, but
    /// write nothing ("dry-run via incremental")
    pub cached_render_only: bool,
}

/// State describing the single changed file driving an incremental run.
pub struct IncrementalContext {
    pub changed: SourcePath,
    /// The change is a raw-copy asset, not a template
    pub changed_is_copy: bool,
    /// The change is itself a full template
    pub is_full_template: bool,
    /// Entries the graph reports as affected, collection deletions included
    pub deletion_relevant: FxHashSet<SourcePath>,
}

/// Builds the ordered entry collection for one pass.
pub struct BuildSetBuilder<'a> {
    pub cache: &'a TemplateCache,
    pub registry: &'a dyn EngineRegistry,
    pub graph: &'a dyn DependencyGraph,
    pub gate: &'a dyn PassthroughGate,
    pub counters: &'a Counters,
    pub flags: RunFlags,
    pub global: Arc<RunData>,
    pub content_root: PathBuf,
}

impl BuildSetBuilder<'_> {
    /// Classify every path into the run's build entries.
    pub fn build(
        &self,
        paths: &[SourcePath],
        changed: Option<&SourcePath>,
    ) -> Result<Vec<BuildEntry>, BuildError> {
        let mut entries = Vec::with_capacity(paths.len());

        let ctx = match changed {
            Some(changed) => Some(self.prepare_incremental(paths, changed, &mut entries)?),
            None => None,
        };

        for path in paths {
            if !self.registry.has_engine(path) {
                continue;
            }

            match &ctx {
                Some(ctx) if ctx.changed_is_copy => {
                    // A changed passthrough asset never triggers template
                    // regeneration; the copy pass handles it
                    self.counters.count_skip();
                }
                Some(ctx) if path == &ctx.changed => {
                    // Registered before the loop
                }
                Some(ctx) => {
                    if self.gate.is_passthrough_copy(paths, path) {
                        self.counters.count_skip();
                        continue;
                    }
                    entries.push(self.incremental_entry(path, ctx)?);
                }
                None => {
                    if self.gate.is_passthrough_copy(paths, path) {
                        self.counters.count_skip();
                        continue;
                    }
                    entries.push(self.fresh_entry(path)?);
                }
            }
        }

        // Future incremental runs compare against this run's relationships
        self.graph.commit();
        self.graph.persist()?;

        Ok(entries)
    }

    /// Steps 2 and 4: classify the changed path and, if it is a full
    /// template, fold its cascade into the graph before anything else is
    /// classified.
    fn prepare_incremental(
        &self,
        paths: &[SourcePath],
        changed: &SourcePath,
        entries: &mut Vec<BuildEntry>,
    ) -> Result<IncrementalContext, BuildError> {
        let changed_is_copy = self.gate.is_passthrough_copy(paths, changed);
        let is_full_template = !changed_is_copy && self.registry.has_engine(changed);
        let mut deletion_relevant = FxHashSet::default();

        if is_full_template {
            if changed.absolute_under(&self.content_root).exists() {
                let handle = self.checkout(changed);
                if self.flags.suppress_initial_render {
                    handle.set_render_enabled(Some(true));
                }
                // Ordering point: later relevance checks depend on the graph
                // already reflecting this change
                let meta = self.graph.register_entry(&handle)?;
                deletion_relevant = self.graph.relevant_entries_for_change(changed);
                entries.push(BuildEntry {
                    handle,
                    meta,
                    cached_render_only: false,
                });
            } else {
                // The change is a deletion: nothing to build, but consumers
                // of its collections must be told
                self.graph.register_removal(changed);
                deletion_relevant = self.graph.relevant_entries_for_change(changed);
            }
        }

        Ok(IncrementalContext {
            changed: changed.clone(),
            changed_is_copy,
            is_full_template,
            deletion_relevant,
        })
    }

    /// Step 5: full-run entry with warm-up semantics.
    fn fresh_entry(&self, path: &SourcePath) -> Result<BuildEntry, BuildError> {
        let (handle, preexisting) = self.cache.get_or_create(path, &self.global);
        handle.apply_run_flags(self.flags.dry_run, self.flags.verbose);
        handle.reset_per_run();

        if preexisting {
            // A full run rebuilds; content caches from earlier runs are stale
            handle.invalidate_source();
        }

        if self.flags.suppress_initial_render {
            if preexisting {
                // Survived a previous watch cycle: render again
                handle.set_render_enabled(Some(true));
            } else {
                // First sight under no-initial-render: hold output back
                handle.set_render_enabled(Some(false));
            }
        }

        let meta = self.graph.register_entry(&handle)?;
        Ok(BuildEntry {
            handle,
            meta,
            cached_render_only: false,
        })
    }

    /// Step 6: incremental per-path invalidation.
    fn incremental_entry(
        &self,
        path: &SourcePath,
        ctx: &IncrementalContext,
    ) -> Result<BuildEntry, BuildError> {
        let handle = self.checkout(path);

        // A lazy engine lookup later would race with concurrent generation
        handle.warm_engine().map_err(|source| {
            BuildError::Graph(crate::graph::GraphError::DataCascade {
                path: path.clone(),
                source,
            })
        })?;

        let relevant = ctx.deletion_relevant.contains(path)
            || handle.is_relevant_to(&ctx.changed, ctx.is_full_template);

        let cached_render_only = if relevant {
            // Content may have changed transitively
            handle.reset_caches(CacheReset::DATA_AND_RENDER);
            if self.flags.suppress_initial_render {
                handle.set_render_enabled(Some(true));
            }
            false
        } else {
            // Data may reference globally changed state; content cannot have
            handle.reset_caches(CacheReset::DATA);
            if self.flags.suppress_initial_render {
                handle.set_render_enabled(Some(false));
            }
            self.counters.count_skip();
            true
        };

        // The cascade is recomputed as part of registration either way
        let meta = self.graph.register_entry(&handle)?;
        Ok(BuildEntry {
            handle,
            meta,
            cached_render_only,
        })
    }

    /// 4.1 contract: fetch the handle, then apply run flags and soft-reset.
    fn checkout(&self, path: &SourcePath) -> Arc<TemplateHandle> {
        let (handle, _preexisting) = self.cache.get_or_create(path, &self.global);
        handle.apply_run_flags(self.flags.dry_run, self.flags.verbose);
        handle.reset_per_run();
        handle
    }
}
