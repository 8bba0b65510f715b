//! Normalized source path identity.
//!
//! Every input file is addressed by a [`SourcePath`]: a relative path with
//! redundant `./` components stripped and `/` separators, so the same
//! physical file always maps to the same template-cache key no matter how a
//! caller spelled it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Normalized, stable identity of one input file.
///
/// Used as the template-cache key and throughout the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourcePath(String);

impl SourcePath {
    /// Normalize a path into its canonical key form.
    ///
    /// `./posts/a.md`, `posts/./a.md` and `posts/a.md` all map to the same
    /// key. `..` components are resolved lexically.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let mut parts: Vec<String> = Vec::new();
        for component in path.as_ref().components() {
            match component {
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    parts.pop();
                }
                Component::Normal(part) => {
                    parts.push(part.to_string_lossy().into_owned());
                }
            }
        }
        Self(parts.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path relative to the content root.
    pub fn as_rel_path(&self) -> &Path {
        Path::new(&self.0)
    }

    /// Absolute location under the given content root.
    pub fn absolute_under(&self, root: &Path) -> PathBuf {
        root.join(self.as_rel_path())
    }

    /// Lower-cased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        self.as_rel_path()
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }
}

impl fmt::Display for SourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_cur_dir() {
        assert_eq!(SourcePath::new("./posts/a.md"), SourcePath::new("posts/a.md"));
        assert_eq!(SourcePath::new("posts/./a.md"), SourcePath::new("posts/a.md"));
    }

    #[test]
    fn test_normalize_resolves_parent_dir() {
        assert_eq!(
            SourcePath::new("posts/drafts/../a.md"),
            SourcePath::new("posts/a.md")
        );
    }

    #[test]
    fn test_extension_lowercased() {
        assert_eq!(SourcePath::new("a/B.MD").extension().as_deref(), Some("md"));
        assert_eq!(SourcePath::new("a/no_ext").extension(), None);
    }

    #[test]
    fn test_display_uses_forward_slashes() {
        assert_eq!(SourcePath::new("posts/a.md").to_string(), "posts/a.md");
    }
}
