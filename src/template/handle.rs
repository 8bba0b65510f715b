//! Persistent per-path template handle.
//!
//! A handle is created at most once per source path for the process lifetime
//! and survives across builds (including watch-loop restarts of the build
//! pipeline). It owns three independently invalidated sub-caches:
//!
//! | Cache   | Holds                        | Cleared when                      |
//! |---------|------------------------------|-----------------------------------|
//! | read    | parsed source + front matter | the file itself changed           |
//! | data    | computed data cascade        | any change (global state may leak)|
//! | render  | rendered content             | the entry is relevant to a change |
//!
//! Clearing one cache never implicitly clears another; the classification
//! policy in `build::set` decides which combination goes.

use crate::data::RunData;
use crate::engine::{
    ContentLookup, Engine, EngineRegistry, FrontMatter, PageSlot, ParsedSource, RenderError,
};
use crate::source::SourcePath;
use anyhow::{Context, Result, anyhow};
use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// ============================================================================
// Cascade types
// ============================================================================

/// Pagination metadata carried from the cascade to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub pages: usize,
}

/// The computed data cascade of one entry for one run.
#[derive(Debug, Clone)]
pub struct DataCascade {
    pub title: Option<String>,
    pub layout: Option<SourcePath>,
    pub permalink: Option<String>,
    /// Collections this entry is a member of
    pub tags: Vec<String>,
    /// Collection this entry consumes
    pub collection: Option<String>,
    pub pagination: Option<Pagination>,
    pub extra: toml::Table,
    pub global: Arc<RunData>,
}

impl DataCascade {
    pub fn from_front(front: &FrontMatter, global: Arc<RunData>) -> Self {
        Self {
            title: front.title.clone(),
            layout: front.layout.as_deref().map(SourcePath::new),
            permalink: front.permalink.clone(),
            tags: front.tags.clone(),
            collection: front.collection.clone(),
            pagination: front
                .pagination
                .filter(|pages| *pages > 1)
                .map(|pages| Pagination { pages }),
            extra: front.extra.clone(),
            global,
        }
    }
}

/// Per-run metadata of one build entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub input: SourcePath,
    /// Output location relative to the output root
    pub output: PathBuf,
    pub pagination: Option<Pagination>,
}

/// Which sub-caches a reset touches.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheReset {
    pub data: bool,
    pub render: bool,
}

impl CacheReset {
    pub const DATA: Self = Self {
        data: true,
        render: false,
    };
    pub const DATA_AND_RENDER: Self = Self {
        data: true,
        render: true,
    };
}

/// Map a source path and optional permalink to an output location.
///
/// `posts/hello.md` becomes `posts/hello/index.html`; an `index.*` source
/// stays at its directory's `index.html`. A permalink overrides the mapping:
/// trailing `/` or no extension appends `index.html`.
pub fn output_path_for(source: &SourcePath, permalink: Option<&str>) -> PathBuf {
    if let Some(permalink) = permalink {
        let trimmed = permalink.trim_start_matches('/');
        if trimmed.is_empty() {
            return PathBuf::from("index.html");
        }
        if !trimmed.ends_with('/') && Path::new(trimmed).extension().is_some() {
            return PathBuf::from(trimmed);
        }
        return Path::new(trimmed.trim_end_matches('/')).join("index.html");
    }

    let rel = source.as_rel_path();
    let stem = rel.file_stem().and_then(|s| s.to_str()).unwrap_or("index");
    let parent = rel.parent().unwrap_or(Path::new(""));
    if stem == "index" {
        parent.join("index.html")
    } else {
        parent.join(stem).join("index.html")
    }
}

// ============================================================================
// Template handle
// ============================================================================

/// Long-lived per-path template object.
pub struct TemplateHandle {
    source: SourcePath,
    abs_path: PathBuf,
    registry: Arc<dyn EngineRegistry>,

    /// Run-level data provider, re-bound by the template cache each run
    global: ArcSwap<RunData>,

    /// Materialized engine (warmed eagerly during incremental runs)
    engine: Mutex<Option<Arc<dyn Engine>>>,

    read_cache: Mutex<Option<Arc<ParsedSource>>>,
    data_cache: Mutex<Option<Arc<DataCascade>>>,
    render_cache: Mutex<Option<Arc<str>>>,

    /// Render override: `None` means the engine default (enabled)
    render_enabled: Mutex<Option<bool>>,
    dry_run: AtomicBool,
    verbose: AtomicBool,

    /// Per-run bookkeeping, cleared by the soft reset
    meta_memo: Mutex<Option<EntryMeta>>,

    /// Templates this entry embeds or is laid out by
    template_deps: RwLock<FxHashSet<SourcePath>>,
    /// Non-template files this entry consumes as data
    data_deps: RwLock<FxHashSet<SourcePath>>,
}

impl TemplateHandle {
    pub fn new(
        source: SourcePath,
        content_root: &Path,
        registry: Arc<dyn EngineRegistry>,
        global: Arc<RunData>,
    ) -> Self {
        let abs_path = source.absolute_under(content_root);
        Self {
            source,
            abs_path,
            registry,
            global: ArcSwap::new(global),
            engine: Mutex::new(None),
            read_cache: Mutex::new(None),
            data_cache: Mutex::new(None),
            render_cache: Mutex::new(None),
            render_enabled: Mutex::new(None),
            dry_run: AtomicBool::new(false),
            verbose: AtomicBool::new(false),
            meta_memo: Mutex::new(None),
            template_deps: RwLock::new(FxHashSet::default()),
            data_deps: RwLock::new(FxHashSet::default()),
        }
    }

    pub fn source(&self) -> &SourcePath {
        &self.source
    }

    /// Swap in the current run's data provider (lock-free for readers).
    pub fn bind_data(&self, global: Arc<RunData>) {
        self.global.store(global);
    }

    /// Apply the run-level flags. Cached handles were constructed before the
    /// current run, so flags toggled since then still take effect.
    pub fn apply_run_flags(&self, dry_run: bool, verbose: bool) {
        self.dry_run.store(dry_run, Ordering::Relaxed);
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run.load(Ordering::Relaxed)
    }

    pub fn verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    /// Full soft reset of per-run bookkeeping.
    ///
    /// Does not touch the read/data/render caches; those are governed by the
    /// selective [`reset_caches`](Self::reset_caches).
    pub fn reset_per_run(&self) {
        *self.meta_memo.lock() = None;
        *self.render_enabled.lock() = None;
    }

    pub fn set_render_enabled(&self, enabled: Option<bool>) {
        *self.render_enabled.lock() = enabled;
    }

    pub fn render_enabled(&self) -> bool {
        self.render_enabled.lock().unwrap_or(true)
    }

    #[allow(dead_code)]
    pub fn render_override(&self) -> Option<bool> {
        *self.render_enabled.lock()
    }

    /// Eagerly materialize the render engine.
    ///
    /// Incremental runs call this before scheduling so a cache miss cannot
    /// race with concurrent generation.
    pub fn warm_engine(&self) -> Result<()> {
        self.engine().map(|_| ())
    }

    fn engine(&self) -> Result<Arc<dyn Engine>> {
        let mut slot = self.engine.lock();
        if let Some(engine) = slot.clone() {
            return Ok(engine);
        }
        let engine = self
            .registry
            .engine_for(&self.source)
            .ok_or_else(|| anyhow!("no engine registered for `{}`", self.source))?;
        *slot = Some(engine.clone());
        Ok(engine)
    }

    /// Parsed source, read and parsed once per invalidation.
    pub fn read(&self) -> Result<Arc<ParsedSource>> {
        if let Some(cached) = self.read_cache.lock().clone() {
            return Ok(cached);
        }
        let raw = std::fs::read_to_string(&self.abs_path)
            .with_context(|| format!("failed to read `{}`", self.abs_path.display()))?;
        let parsed = Arc::new(self.engine()?.parse(&self.source, &raw)?);
        *self.read_cache.lock() = Some(parsed.clone());
        Ok(parsed)
    }

    /// The computed data cascade, recording dependency edges as a side effect.
    pub fn data(&self) -> Result<Arc<DataCascade>> {
        if let Some(cached) = self.data_cache.lock().clone() {
            return Ok(cached);
        }
        let parsed = self.read()?;
        let cascade = Arc::new(DataCascade::from_front(
            &parsed.front,
            self.global.load_full(),
        ));

        {
            let mut deps = self.template_deps.write();
            deps.clear();
            if let Some(layout) = &cascade.layout {
                deps.insert(layout.clone());
            }
            for include in &parsed.includes {
                deps.insert(include.clone());
            }
        }
        {
            let mut deps = self.data_deps.write();
            deps.clear();
            for file in &parsed.front.data_files {
                deps.insert(SourcePath::new(file));
            }
        }

        *self.data_cache.lock() = Some(cascade.clone());
        Ok(cascade)
    }

    /// Per-run entry metadata, memoized until the next soft reset.
    pub fn entry_meta(&self) -> Result<EntryMeta> {
        if let Some(meta) = self.meta_memo.lock().clone() {
            return Ok(meta);
        }
        let data = self.data()?;
        let meta = EntryMeta {
            input: self.source.clone(),
            output: output_path_for(&self.source, data.permalink.as_deref()),
            pagination: data.pagination,
        };
        *self.meta_memo.lock() = Some(meta.clone());
        Ok(meta)
    }

    /// Render one page, serving unpaginated renders from the render cache.
    pub fn render(
        &self,
        page: Option<PageSlot>,
        content: &dyn ContentLookup,
    ) -> Result<Arc<str>, RenderError> {
        if page.is_none()
            && let Some(cached) = self.render_cache.lock().clone()
        {
            return Ok(cached);
        }
        let parsed = self.read().map_err(RenderError::Engine)?;
        let data = self.data().map_err(RenderError::Engine)?;
        let engine = self.engine().map_err(RenderError::Engine)?;
        let rendered: Arc<str> = engine
            .render(&self.source, &parsed, &data, page, content)?
            .into();
        if page.is_none() {
            *self.render_cache.lock() = Some(rendered.clone());
        }
        Ok(rendered)
    }

    /// Clear the selected sub-caches; the others stay untouched.
    pub fn reset_caches(&self, reset: CacheReset) {
        if reset.data {
            *self.data_cache.lock() = None;
        }
        if reset.render {
            *self.render_cache.lock() = None;
        }
    }

    /// Drop every content-derived cache. Called when the source file itself
    /// changed on disk, before classification runs.
    pub fn invalidate_source(&self) {
        *self.read_cache.lock() = None;
        *self.data_cache.lock() = None;
        *self.render_cache.lock() = None;
        *self.meta_memo.lock() = None;
    }

    /// Whether a change to `changed` affects this entry.
    ///
    /// Template changes propagate through layout/include edges; non-template
    /// changes only through declared data-file edges.
    pub fn is_relevant_to(&self, changed: &SourcePath, is_full_template: bool) -> bool {
        if &self.source == changed {
            return true;
        }
        if is_full_template {
            self.template_deps.read().contains(changed)
        } else {
            self.data_deps.read().contains(changed)
        }
    }

    pub fn template_deps(&self) -> FxHashSet<SourcePath> {
        self.template_deps.read().clone()
    }

    // Cache-state inspection, used by classification tests
    #[allow(dead_code)]
    pub fn has_read_cache(&self) -> bool {
        self.read_cache.lock().is_some()
    }

    #[allow(dead_code)]
    pub fn has_data_cache(&self) -> bool {
        self.data_cache.lock().is_some()
    }

    #[allow(dead_code)]
    pub fn has_render_cache(&self) -> bool {
        self.render_cache.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExtensionRegistry;
    use tempfile::TempDir;

    struct NoContent;

    impl ContentLookup for NoContent {
        fn rendered(&self, _path: &SourcePath) -> Option<Arc<str>> {
            None
        }
    }

    fn handle_for(dir: &TempDir, rel: &str, raw: &str) -> TemplateHandle {
        let abs = dir.path().join(rel);
        if let Some(parent) = abs.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&abs, raw).unwrap();
        TemplateHandle::new(
            SourcePath::new(rel),
            dir.path(),
            Arc::new(ExtensionRegistry::with_basic(&["md".into()])),
            Arc::new(RunData::empty()),
        )
    }

    #[test]
    fn test_sub_caches_reset_independently() {
        let dir = TempDir::new().unwrap();
        let handle = handle_for(&dir, "a.md", "+++\ntitle = \"A\"\n+++\nhello");

        handle.render(None, &NoContent).unwrap();
        assert!(handle.has_read_cache());
        assert!(handle.has_data_cache());
        assert!(handle.has_render_cache());

        handle.reset_caches(CacheReset::DATA);
        assert!(!handle.has_data_cache());
        assert!(handle.has_render_cache());
        assert!(handle.has_read_cache());

        handle.reset_caches(CacheReset::DATA_AND_RENDER);
        assert!(!handle.has_render_cache());
        assert!(handle.has_read_cache());
    }

    #[test]
    fn test_render_served_from_cache() {
        let dir = TempDir::new().unwrap();
        let handle = handle_for(&dir, "a.md", "first");

        let before = handle.render(None, &NoContent).unwrap();

        // The file changes on disk, but without invalidation the caches win
        std::fs::write(dir.path().join("a.md"), "second").unwrap();
        let after = handle.render(None, &NoContent).unwrap();
        assert_eq!(before, after);

        handle.invalidate_source();
        let fresh = handle.render(None, &NoContent).unwrap();
        assert_eq!(&*fresh, "second");
    }

    #[test]
    fn test_relevance_through_layout_edge() {
        let dir = TempDir::new().unwrap();
        let handle = handle_for(&dir, "b.md", "+++\nlayout = \"shell.md\"\n+++\nbody");
        handle.data().unwrap();

        assert!(handle.is_relevant_to(&SourcePath::new("shell.md"), true));
        assert!(!handle.is_relevant_to(&SourcePath::new("other.md"), true));
        // A non-template change does not travel the layout edge
        assert!(!handle.is_relevant_to(&SourcePath::new("shell.md"), false));
    }

    #[test]
    fn test_relevance_through_data_file_edge() {
        let dir = TempDir::new().unwrap();
        let handle = handle_for(&dir, "b.md", "+++\ndata_files = [\"feed.json\"]\n+++\nx");
        handle.data().unwrap();

        assert!(handle.is_relevant_to(&SourcePath::new("feed.json"), false));
        assert!(!handle.is_relevant_to(&SourcePath::new("feed.json"), true));
    }

    #[test]
    fn test_soft_reset_keeps_content_caches() {
        let dir = TempDir::new().unwrap();
        let handle = handle_for(&dir, "a.md", "hello");
        handle.render(None, &NoContent).unwrap();
        handle.entry_meta().unwrap();
        handle.set_render_enabled(Some(false));

        handle.reset_per_run();
        assert!(handle.render_override().is_none());
        assert!(handle.has_read_cache());
        assert!(handle.has_data_cache());
        assert!(handle.has_render_cache());
    }

    #[test]
    fn test_output_path_mapping() {
        assert_eq!(
            output_path_for(&SourcePath::new("posts/hello.md"), None),
            PathBuf::from("posts/hello/index.html")
        );
        assert_eq!(
            output_path_for(&SourcePath::new("index.md"), None),
            PathBuf::from("index.html")
        );
        assert_eq!(
            output_path_for(&SourcePath::new("posts/index.md"), None),
            PathBuf::from("posts/index.html")
        );
        assert_eq!(
            output_path_for(&SourcePath::new("a.md"), Some("/about/")),
            PathBuf::from("about/index.html")
        );
        assert_eq!(
            output_path_for(&SourcePath::new("a.md"), Some("feed.xml")),
            PathBuf::from("feed.xml")
        );
    }
}
