//! Build orchestration.
//!
//! The orchestrator owns the persistent template cache and the run counters
//! and drives one build at a time:
//!
//! ```text
//! run_full_build() / run_incremental_build(changed)
//!     │
//!     ├── RunData::load() ──────────► run-level data snapshot
//!     ├── FileDiscovery::list_paths()
//!     ├── BuildSetBuilder::build() ─► classify, invalidate, register
//!     │                               (graph committed + persisted)
//!     └── rayon::join
//!           ├── GenerationScheduler::generate()  (two waves)
//!           └── PassthroughGate::copy_all()
//! ```
//!
//! Collaborators are injected at construction; nothing is lazily created
//! behind a getter, so a run's dependencies are fixed before it starts.

pub mod error;
pub mod schedule;
pub mod set;

pub use error::BuildError;
pub use schedule::{GenerationScheduler, OutputDescriptor};
pub use set::{BuildEntry, BuildSetBuilder, IncrementalContext};

use crate::config::SiteConfig;
use crate::data::RunData;
use crate::discovery::FileDiscovery;
use crate::engine::EngineRegistry;
use crate::graph::DependencyGraph;
use crate::log;
use crate::passthrough::PassthroughGate;
use crate::source::SourcePath;
use crate::template::TemplateCache;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// Run bookkeeping
// ============================================================================

/// Flags applied to every handle of a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunFlags {
    pub dry_run: bool,
    pub verbose: bool,
    /// No-initial-render mode: hold back output for files first seen in a
    /// full run (watch sessions skip the very first build's writes)
    pub suppress_initial_render: bool,
}

/// Write/skip counters of the current run.
///
/// Incremented from concurrent completions, so atomics rather than any
/// assumption about completion order.
#[derive(Debug, Default)]
pub struct Counters {
    written: AtomicUsize,
    skipped: AtomicUsize,
}

impl Counters {
    pub fn count_write(&self) {
        self.written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Reset between runs. Never called mid-run: the retry wave resumes the
    /// run it belongs to.
    pub fn reset(&self) {
        self.written.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
    }
}

/// Aggregate result of one run.
///
/// A run with failures still carries every successful sibling's outputs;
/// partial results are not discarded.
#[derive(Debug)]
pub struct BuildSummary {
    pub written: usize,
    pub skipped: usize,
    pub outputs: Vec<OutputDescriptor>,
    pub failures: Vec<BuildError>,
}

impl BuildSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// The incremental-build orchestrator.
pub struct Orchestrator {
    content_root: PathBuf,
    output_root: PathBuf,
    data_root: PathBuf,
    flags: RunFlags,
    cache: TemplateCache,
    registry: Arc<dyn EngineRegistry>,
    graph: Box<dyn DependencyGraph>,
    gate: Box<dyn PassthroughGate>,
    discovery: Box<dyn FileDiscovery>,
    counters: Counters,
}

impl Orchestrator {
    pub fn new(
        content_root: PathBuf,
        output_root: PathBuf,
        data_root: PathBuf,
        flags: RunFlags,
        registry: Arc<dyn EngineRegistry>,
        graph: Box<dyn DependencyGraph>,
        gate: Box<dyn PassthroughGate>,
        discovery: Box<dyn FileDiscovery>,
    ) -> Self {
        Self {
            cache: TemplateCache::new(content_root.clone(), registry.clone()),
            content_root,
            output_root,
            data_root,
            flags,
            registry,
            graph,
            gate,
            discovery,
            counters: Counters::default(),
        }
    }

    /// Construct from configuration. A build without a configuration handle
    /// is impossible, so the absence is fatal here.
    pub fn from_config(
        config: Option<&SiteConfig>,
        registry: Arc<dyn EngineRegistry>,
        graph: Box<dyn DependencyGraph>,
        gate: Box<dyn PassthroughGate>,
        discovery: Box<dyn FileDiscovery>,
    ) -> Result<Self, BuildError> {
        let config = config.ok_or(BuildError::ConfigMissing)?;
        Ok(Self::new(
            config.content_root(),
            config.output_root(),
            config.data_root(),
            RunFlags {
                dry_run: config.build.dry_run,
                verbose: config.build.verbose,
                suppress_initial_render: config.watch.no_initial_render,
            },
            registry,
            graph,
            gate,
            discovery,
        ))
    }

    /// Generate everything.
    pub fn run_full_build(&self) -> Result<BuildSummary, BuildError> {
        self.run(None, true)
    }

    /// Generate what a single changed path touches.
    pub fn run_incremental_build(&self, changed: &SourcePath) -> Result<BuildSummary, BuildError> {
        // The changed file's content-derived caches are stale by definition
        if let Some(handle) = self.cache.get(changed) {
            handle.invalidate_source();
        }
        self.run(Some(changed), true)
    }

    /// Pure content generation: no passthrough copy, no incremental mode,
    /// nothing written to disk.
    pub fn generate_as_data(&self) -> Result<Vec<OutputDescriptor>, BuildError> {
        self.run(None, false).map(|summary| summary.outputs)
    }

    fn run(&self, changed: Option<&SourcePath>, write: bool) -> Result<BuildSummary, BuildError> {
        // A fresh run, not a resumption: counters start over
        self.counters.reset();

        let global = Arc::new(RunData::load(&self.data_root));
        let paths = self.discovery.list_paths();

        let builder = BuildSetBuilder {
            cache: &self.cache,
            registry: self.registry.as_ref(),
            graph: self.graph.as_ref(),
            gate: self.gate.as_ref(),
            counters: &self.counters,
            flags: self.flags,
            global,
            content_root: self.content_root.clone(),
        };
        let entries = builder.build(&paths, changed)?;

        let scheduler = GenerationScheduler::new(
            &self.output_root,
            &self.counters,
            write && !self.flags.dry_run,
        );

        // Copy runs beside generation; its failure is reported, never
        // aborting template work
        let (report, copy_result) = rayon::join(
            || scheduler.generate(entries),
            || {
                if write {
                    self.gate.copy_all(&paths, changed).map(Some)
                } else {
                    Ok(None)
                }
            },
        );

        let mut failures = report.failures;
        match copy_result {
            Ok(Some(copied)) if copied > 0 => log!("copy"; "{copied} passthrough files"),
            Ok(_) => {}
            Err(err) => failures.push(BuildError::Copy(err)),
        }

        Ok(BuildSummary {
            written: self.counters.written(),
            skipped: self.counters.skipped(),
            outputs: report.outputs,
            failures,
        })
    }
}

/// Counter surface, queryable at any time by an embedding driver.
#[allow(dead_code)]
impl Orchestrator {
    pub fn write_count(&self) -> usize {
        self.counters.written()
    }

    pub fn skipped_count(&self) -> usize {
        self.counters.skipped()
    }

    /// Counters otherwise reset only at the start of a fresh run.
    pub fn reset_counters(&self) {
        self.counters.reset();
    }

    pub fn template_cache(&self) -> &TemplateCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::WalkDiscovery;
    use crate::engine::ExtensionRegistry;
    use crate::graph::MapGraph;
    use crate::passthrough::CopyGate;
    use tempfile::TempDir;

    struct Site {
        dir: TempDir,
    }

    impl Site {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::create_dir_all(dir.path().join("content")).unwrap();
            Self { dir }
        }

        fn write(&self, rel: &str, raw: &str) {
            let path = self.dir.path().join("content").join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, raw).unwrap();
        }

        fn output(&self, rel: &str) -> PathBuf {
            self.dir.path().join("public").join(rel)
        }

        fn orchestrator(&self, flags: RunFlags) -> Orchestrator {
            let content = self.dir.path().join("content");
            let output = self.dir.path().join("public");
            let registry = Arc::new(ExtensionRegistry::with_basic(&["md".into()]));
            Orchestrator::new(
                content.clone(),
                output.clone(),
                self.dir.path().join("data"),
                flags,
                registry,
                Box::new(MapGraph::in_memory()),
                Box::new(CopyGate::new(
                    content.clone(),
                    output,
                    &["css".into()],
                    &["static".into()],
                    flags.dry_run,
                )),
                Box::new(WalkDiscovery::new(content)),
            )
        }
    }

    #[test]
    fn test_full_build_writes_outputs() {
        let site = Site::new();
        site.write("index.md", "home");
        site.write("posts/a.md", "+++\ntitle = \"A\"\n+++\n{{ title }}");

        let orch = site.orchestrator(RunFlags::default());
        let summary = orch.run_full_build().unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.written, 2);
        assert_eq!(summary.skipped, 0);
        assert_eq!(
            std::fs::read_to_string(site.output("posts/a/index.html")).unwrap(),
            "A"
        );
    }

    #[test]
    fn test_idempotent_rerun() {
        let site = Site::new();
        site.write("a.md", "a");
        site.write("b.md", "b");

        let orch = site.orchestrator(RunFlags::default());
        let first = orch.run_full_build().unwrap();
        let second = orch.run_full_build().unwrap();

        assert_eq!(first.written, second.written);
        assert_eq!(second.skipped, 0);

        let outputs = |summary: &BuildSummary| {
            let mut pairs: Vec<_> = summary
                .outputs
                .iter()
                .map(|o| (o.input.clone(), o.output.clone(), o.content.clone()))
                .collect();
            pairs.sort();
            pairs
        };
        assert_eq!(outputs(&first), outputs(&second));
    }

    #[test]
    fn test_incremental_rebuilds_only_affected() {
        let site = Site::new();
        site.write("a.md", "v1 {{ body }}");
        site.write("b.md", "+++\nlayout = \"a.md\"\n+++\nb body");
        site.write("c.md", "c body");

        let orch = site.orchestrator(RunFlags::default());
        orch.run_full_build().unwrap();
        assert_eq!(
            std::fs::read_to_string(site.output("b/index.html")).unwrap(),
            "v1 b body"
        );

        // a changes; b must pick it up, c may serve its cache
        site.write("a.md", "v2 {{ body }}");
        let summary = orch
            .run_incremental_build(&SourcePath::new("a.md"))
            .unwrap();

        assert!(summary.is_success());
        assert_eq!(
            std::fs::read_to_string(site.output("b/index.html")).unwrap(),
            "v2 b body"
        );
        // a and b were written; c was the one skip
        assert_eq!(summary.written, 2);
        assert_eq!(summary.skipped, 1);
        let c = orch.template_cache().get(&SourcePath::new("c.md")).unwrap();
        assert!(c.has_render_cache());
    }

    #[test]
    fn test_counter_accuracy_with_passthrough_asset() {
        let site = Site::new();
        // Five qualifying paths: the changed one, a dependent, two untouched,
        // one the gate claims as a raw-copy asset
        site.write("changed.md", "layout {{ body }}");
        site.write("dep.md", "+++\nlayout = \"changed.md\"\n+++\nd");
        site.write("u1.md", "u1");
        site.write("u2.md", "u2");
        site.write("static/raw.md", "asset");

        let orch = site.orchestrator(RunFlags::default());
        orch.run_full_build().unwrap();

        site.write("changed.md", "layout2 {{ body }}");
        let summary = orch
            .run_incremental_build(&SourcePath::new("changed.md"))
            .unwrap();

        assert!(summary.is_success());
        // u1 + u2 skipped via incremental, static/raw.md skipped as an asset
        assert_eq!(summary.skipped, 3);
        // changed + dep actually re-rendered and written
        assert_eq!(summary.written, 2);
    }

    #[test]
    fn test_changed_passthrough_never_regenerates_templates() {
        let site = Site::new();
        site.write("a.md", "a");
        site.write("b.md", "b");
        site.write("style.css", "body {}");

        let orch = site.orchestrator(RunFlags::default());
        orch.run_full_build().unwrap();
        let stamp_before = std::fs::metadata(site.output("a/index.html"))
            .unwrap()
            .modified()
            .unwrap();

        let summary = orch
            .run_incremental_build(&SourcePath::new("style.css"))
            .unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.written, 0);
        assert_eq!(summary.skipped, 2);
        // The asset itself was still copied
        assert!(site.output("style.css").exists());
        let stamp_after = std::fs::metadata(site.output("a/index.html"))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(stamp_before, stamp_after);
    }

    #[test]
    fn test_generate_as_data_writes_nothing() {
        let site = Site::new();
        site.write("a.md", "a");
        site.write("style.css", "body {}");

        let orch = site.orchestrator(RunFlags::default());
        let outputs = orch.generate_as_data().unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(&*outputs[0].content, "a");
        assert!(!outputs[0].written);
        assert!(!site.output("a/index.html").exists());
        assert!(!site.output("style.css").exists());
    }

    #[test]
    fn test_suppressed_initial_build_then_rerun() {
        let site = Site::new();
        site.write("a.md", "a");

        let flags = RunFlags {
            suppress_initial_render: true,
            ..RunFlags::default()
        };
        let orch = site.orchestrator(flags);

        // First build of the watch session: handle is new, output held back
        let first = orch.run_full_build().unwrap();
        assert_eq!(first.written, 0);
        assert!(!site.output("a/index.html").exists());

        // Second build: the handle pre-exists, render re-enabled
        let second = orch.run_full_build().unwrap();
        assert_eq!(second.written, 1);
        assert!(site.output("a/index.html").exists());
    }

    #[test]
    fn test_failures_keep_sibling_outputs() {
        let site = Site::new();
        site.write("good.md", "fine");
        site.write("bad.md", "{{ content \"never.md\" }}");

        let orch = site.orchestrator(RunFlags::default());
        let summary = orch.run_full_build().unwrap();

        assert!(!summary.is_success());
        assert_eq!(summary.failures.len(), 1);
        assert!(
            summary
                .outputs
                .iter()
                .any(|o| o.input == SourcePath::new("good.md"))
        );
        assert!(site.output("good/index.html").exists());
    }

    #[test]
    fn test_run_data_flows_into_render() {
        let site = Site::new();
        site.write("a.md", "{{ site.title }}");
        std::fs::create_dir_all(site.dir.path().join("data")).unwrap();
        std::fs::write(site.dir.path().join("data/site.toml"), "title = \"T\"").unwrap();

        let orch = site.orchestrator(RunFlags::default());
        orch.run_full_build().unwrap();
        assert_eq!(
            std::fs::read_to_string(site.output("a/index.html")).unwrap(),
            "T"
        );
    }

    #[test]
    fn test_missing_config_is_fatal_at_construction() {
        let registry = Arc::new(ExtensionRegistry::with_basic(&["md".into()]));
        let result = Orchestrator::from_config(
            None,
            registry,
            Box::new(MapGraph::in_memory()),
            Box::new(CopyGate::new(
                PathBuf::from("content"),
                PathBuf::from("public"),
                &[],
                &[],
                false,
            )),
            Box::new(WalkDiscovery::new(PathBuf::from("content"))),
        );
        assert!(matches!(result, Err(BuildError::ConfigMissing)));
    }
}
