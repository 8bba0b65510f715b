//! Persistent template-handle cache.
//!
//! One handle per normalized source path for the process lifetime. Handles
//! are reused across rebuilds so their sub-caches survive; recreating a
//! handle would silently discard everything incremental builds rely on.

use super::handle::TemplateHandle;
use crate::data::RunData;
use crate::engine::EngineRegistry;
use crate::source::SourcePath;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Concurrent-safe map from source path to its unique handle.
pub struct TemplateCache {
    content_root: PathBuf,
    registry: Arc<dyn EngineRegistry>,
    handles: RwLock<FxHashMap<SourcePath, Arc<TemplateHandle>>>,
}

impl TemplateCache {
    pub fn new(content_root: PathBuf, registry: Arc<dyn EngineRegistry>) -> Self {
        Self {
            content_root,
            registry,
            handles: RwLock::new(FxHashMap::default()),
        }
    }

    /// Fetch or create the handle for `path`.
    ///
    /// On a hit the handle's data provider is re-bound to the current run's,
    /// since the provider may have changed between runs. Either way the
    /// caller still has to apply the current run flags and call the handle's
    /// per-run reset before use.
    ///
    /// Returns the handle and whether it pre-existed.
    pub fn get_or_create(
        &self,
        path: &SourcePath,
        global: &Arc<RunData>,
    ) -> (Arc<TemplateHandle>, bool) {
        if let Some(handle) = self.handles.read().get(path) {
            handle.bind_data(global.clone());
            return (handle.clone(), true);
        }

        let mut handles = self.handles.write();
        // Double-check: another task may have raced us to the write lock
        if let Some(handle) = handles.get(path) {
            handle.bind_data(global.clone());
            return (handle.clone(), true);
        }

        let handle = Arc::new(TemplateHandle::new(
            path.clone(),
            &self.content_root,
            self.registry.clone(),
            global.clone(),
        ));
        handles.insert(path.clone(), handle.clone());
        (handle, false)
    }

    /// Look up an existing handle without creating one.
    pub fn get(&self, path: &SourcePath) -> Option<Arc<TemplateHandle>> {
        self.handles.read().get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExtensionRegistry;
    use tempfile::TempDir;

    fn cache_for(dir: &TempDir) -> TemplateCache {
        TemplateCache::new(
            dir.path().to_path_buf(),
            Arc::new(ExtensionRegistry::with_basic(&["md".into()])),
        )
    }

    #[test]
    fn test_same_handle_for_same_path() {
        let dir = TempDir::new().unwrap();
        let cache = cache_for(&dir);
        let global = Arc::new(RunData::empty());

        let (first, preexisting) = cache.get_or_create(&SourcePath::new("a.md"), &global);
        assert!(!preexisting);

        let (second, preexisting) = cache.get_or_create(&SourcePath::new("a.md"), &global);
        assert!(preexisting);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_normalized_alias_maps_to_same_handle() {
        let dir = TempDir::new().unwrap();
        let cache = cache_for(&dir);
        let global = Arc::new(RunData::empty());

        let (first, _) = cache.get_or_create(&SourcePath::new("posts/a.md"), &global);
        let (second, preexisting) =
            cache.get_or_create(&SourcePath::new("./posts/./a.md"), &global);
        assert!(preexisting);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_hit_rebinds_run_data() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), "x").unwrap();
        let cache = cache_for(&dir);

        let (handle, _) = cache.get_or_create(&SourcePath::new("a.md"), &Arc::new(RunData::empty()));
        let stale = handle.data().unwrap();
        assert!(stale.global.is_empty());

        // New run with fresh data; cascade recomputes against it after reset
        let data_dir = TempDir::new().unwrap();
        std::fs::write(data_dir.path().join("site.toml"), "title = \"T\"").unwrap();
        let fresh = Arc::new(RunData::load(data_dir.path()));

        let (handle, preexisting) = cache.get_or_create(&SourcePath::new("a.md"), &fresh);
        assert!(preexisting);
        handle.reset_caches(crate::template::CacheReset::DATA);
        let rebound = handle.data().unwrap();
        assert_eq!(
            rebound.global.get("site.title").and_then(|v| v.as_str()),
            Some("T")
        );
    }
}
