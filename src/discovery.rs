//! Source file enumeration.

use crate::source::SourcePath;
use std::path::PathBuf;
use walkdir::WalkDir;

/// Files to ignore during directory traversal
const IGNORED_FILES: &[&str] = &[".DS_Store"];

/// Enumerates the source paths of one run. Called once per run; ordering is
/// stable so repeated runs see the same sequence.
pub trait FileDiscovery: Send + Sync {
    fn list_paths(&self) -> Vec<SourcePath>;
}

/// Recursive walk of the content root.
pub struct WalkDiscovery {
    root: PathBuf,
}

impl WalkDiscovery {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl FileDiscovery for WalkDiscovery {
    fn list_paths(&self) -> Vec<SourcePath> {
        let mut paths: Vec<SourcePath> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                let name = e.file_name().to_str().unwrap_or_default();
                !IGNORED_FILES.contains(&name) && !name.starts_with('.')
            })
            .filter_map(|e| {
                e.into_path()
                    .strip_prefix(&self.root)
                    .ok()
                    .map(SourcePath::new)
            })
            .collect();
        paths.sort();
        paths
    }
}
