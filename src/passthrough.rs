//! Raw-copy asset handling.
//!
//! Assets are never templates: they bypass classification and generation
//! entirely and are copied by the gate's own pass, once per run. Copy
//! failures carry their own error kind so they are never mistaken for a
//! render failure.

use crate::log;
use crate::source::SourcePath;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// A passthrough-copy failure.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("failed to copy `{from}` to `{to}`")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Decides which paths are raw-copy assets and performs the copy pass.
pub trait PassthroughGate: Send + Sync {
    /// Whether `candidate` is a raw-copy asset, given the full listing.
    fn is_passthrough_copy(&self, all: &[SourcePath], candidate: &SourcePath) -> bool;

    /// Copy every matching file. With `changed` set (incremental run), only
    /// the changed file is copied when it matches; a non-matching `changed`
    /// copies nothing. Returns the number of files copied.
    fn copy_all(
        &self,
        all: &[SourcePath],
        changed: Option<&SourcePath>,
    ) -> Result<usize, CopyError>;
}

/// Rule-based gate copying from the content root into the output root.
pub struct CopyGate {
    content_root: PathBuf,
    output_root: PathBuf,
    /// Lower-cased extensions treated as assets
    extensions: Vec<String>,
    /// Directory prefixes treated as assets regardless of extension
    dirs: Vec<String>,
    dry_run: bool,
}

impl CopyGate {
    pub fn new(
        content_root: PathBuf,
        output_root: PathBuf,
        extensions: &[String],
        dirs: &[String],
        dry_run: bool,
    ) -> Self {
        Self {
            content_root,
            output_root,
            extensions: extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
            dirs: dirs.iter().map(|d| d.trim_end_matches('/').to_string()).collect(),
            dry_run,
        }
    }

    fn matches(&self, path: &SourcePath) -> bool {
        if path
            .extension()
            .is_some_and(|ext| self.extensions.contains(&ext))
        {
            return true;
        }
        self.dirs.iter().any(|dir| {
            path.as_str()
                .strip_prefix(dir.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    fn copy_one(&self, path: &SourcePath) -> Result<(), CopyError> {
        let from = path.absolute_under(&self.content_root);
        let to = path.absolute_under(&self.output_root);
        let wrap = |source| CopyError::Copy {
            from: from.clone(),
            to: to.clone(),
            source,
        };

        if self.dry_run {
            log!("copy"; "dry-run, skipping {}", path);
            return Ok(());
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(wrap)?;
        }
        fs::copy(&from, &to).map_err(wrap)?;
        Ok(())
    }
}

impl PassthroughGate for CopyGate {
    fn is_passthrough_copy(&self, _all: &[SourcePath], candidate: &SourcePath) -> bool {
        self.matches(candidate)
    }

    fn copy_all(
        &self,
        all: &[SourcePath],
        changed: Option<&SourcePath>,
    ) -> Result<usize, CopyError> {
        let mut copied = 0;
        match changed {
            Some(changed) => {
                if self.matches(changed) {
                    self.copy_one(changed)?;
                    copied += 1;
                }
            }
            None => {
                for path in all.iter().filter(|p| self.matches(p)) {
                    self.copy_one(path)?;
                    copied += 1;
                }
            }
        }
        Ok(copied)
    }
}
