//! Two-wave concurrent generation.
//!
//! Every build entry renders concurrently on the rayon pool. A render that
//! asked for sibling output not yet produced is a legitimate ordering hazard:
//! the entry is collected and retried in a second wave that starts only after
//! every first-wave task settled. The same failure in the second wave is
//! fatal — two waves bound the retry so a genuine circular reference cannot
//! loop forever.
//!
//! Any other failure is wrapped with the entry's input/output paths and the
//! wave number. It never blocks sibling entries: successful outputs are kept
//! even when the run as a whole fails.

use super::error::BuildError;
use super::set::BuildEntry;
use super::Counters;
use crate::engine::{ContentLookup, PageSlot, RenderError};
use crate::log;
use crate::source::SourcePath;
use anyhow::{Context, anyhow};
use parking_lot::RwLock;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One produced output.
#[derive(Debug, Clone)]
pub struct OutputDescriptor {
    pub input: SourcePath,
    /// Location relative to the output root
    pub output: PathBuf,
    pub content: Arc<str>,
    /// Whether the content reached disk (false in dry-run, as-data and
    /// cached-render modes)
    pub written: bool,
}

/// All settled results of one generation run.
pub struct GenerationReport {
    pub outputs: Vec<OutputDescriptor>,
    pub failures: Vec<BuildError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wave {
    First,
    Second,
}

impl Wave {
    const fn number(self) -> u8 {
        match self {
            Self::First => 1,
            Self::Second => 2,
        }
    }
}

/// Tagged per-entry result of one wave.
enum Outcome {
    Produced(Vec<OutputDescriptor>),
    Retry(Box<BuildEntry>),
    Fatal(BuildError),
}

/// A single entry's failure before wrapping.
enum EntryFailure {
    NotReady(SourcePath),
    Other(anyhow::Error),
}

impl From<RenderError> for EntryFailure {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::ContentNotReady(path) => Self::NotReady(path),
            RenderError::Engine(source) => Self::Other(source),
        }
    }
}

/// Drives concurrent generation of one run's entries.
pub struct GenerationScheduler<'a> {
    output_root: &'a Path,
    counters: &'a Counters,
    write_to_disk: bool,
    /// Output published during this run, readable by every sibling render
    published: RwLock<FxHashMap<SourcePath, Arc<str>>>,
}

impl ContentLookup for GenerationScheduler<'_> {
    fn rendered(&self, path: &SourcePath) -> Option<Arc<str>> {
        self.published.read().get(path).cloned()
    }
}

impl<'a> GenerationScheduler<'a> {
    pub fn new(output_root: &'a Path, counters: &'a Counters, write_to_disk: bool) -> Self {
        Self {
            output_root,
            counters,
            write_to_disk,
            published: RwLock::new(FxHashMap::default()),
        }
    }

    /// Generate every entry; at most two waves.
    pub fn generate(&self, entries: Vec<BuildEntry>) -> GenerationReport {
        let mut outputs = Vec::with_capacity(entries.len());
        let mut failures = Vec::new();
        let mut retries = Vec::new();

        let first: Vec<Outcome> = entries
            .into_par_iter()
            .map(|entry| self.attempt(entry, Wave::First))
            .collect();
        for outcome in first {
            match outcome {
                Outcome::Produced(produced) => outputs.extend(produced),
                Outcome::Retry(entry) => retries.push(*entry),
                Outcome::Fatal(err) => failures.push(err),
            }
        }

        // The retry wave starts strictly after every first-wave task settled
        if !retries.is_empty() {
            let second: Vec<Outcome> = retries
                .into_par_iter()
                .map(|entry| self.attempt(entry, Wave::Second))
                .collect();
            for outcome in second {
                match outcome {
                    Outcome::Produced(produced) => outputs.extend(produced),
                    Outcome::Retry(_) => unreachable!("second wave maps retries to fatal"),
                    Outcome::Fatal(err) => failures.push(err),
                }
            }
        }

        GenerationReport { outputs, failures }
    }

    fn attempt(&self, entry: BuildEntry, wave: Wave) -> Outcome {
        match self.generate_entry(&entry) {
            Ok(outputs) => Outcome::Produced(outputs),
            Err(EntryFailure::NotReady(wanted)) => match wave {
                // Collected, not surfaced: the dependency may finish later
                // in this wave
                Wave::First => Outcome::Retry(Box::new(entry)),
                Wave::Second => Outcome::Fatal(BuildError::TemplateGeneration {
                    input: entry.meta.input.clone(),
                    output: entry.meta.output.clone(),
                    wave: wave.number(),
                    source: anyhow!(
                        "rendered content of `{wanted}` was still unavailable in the retry wave"
                    ),
                }),
            },
            Err(EntryFailure::Other(source)) => Outcome::Fatal(BuildError::TemplateGeneration {
                input: entry.meta.input.clone(),
                output: entry.meta.output.clone(),
                wave: wave.number(),
                source,
            }),
        }
    }

    fn generate_entry(&self, entry: &BuildEntry) -> Result<Vec<OutputDescriptor>, EntryFailure> {
        let handle = &entry.handle;

        // Render override: a suppressed entry produces nothing at all
        if !handle.render_enabled() {
            return Ok(Vec::new());
        }

        if entry.cached_render_only {
            // Serve the cache to siblings without writing anything
            let content = handle.render(None, self)?;
            self.publish(&entry.meta.input, content.clone());
            return Ok(vec![OutputDescriptor {
                input: entry.meta.input.clone(),
                output: entry.meta.output.clone(),
                content,
                written: false,
            }]);
        }

        let pages = entry.meta.pagination.map_or(1, |p| p.pages);
        let mut outputs = Vec::with_capacity(pages);
        for index in 0..pages {
            let slot = entry.meta.pagination.map(|p| PageSlot {
                index,
                count: p.pages,
            });
            let content = handle.render(slot, self)?;
            if index == 0 {
                self.publish(&entry.meta.input, content.clone());
            }

            let output = page_output_path(&entry.meta.output, index);
            let written = self.write_output(entry, &output, &content)?;
            if written {
                self.counters.count_write();
            }
            outputs.push(OutputDescriptor {
                input: entry.meta.input.clone(),
                output,
                content,
                written,
            });
        }
        Ok(outputs)
    }

    fn publish(&self, input: &SourcePath, content: Arc<str>) {
        self.published.write().insert(input.clone(), content);
    }

    fn write_output(
        &self,
        entry: &BuildEntry,
        rel: &Path,
        content: &str,
    ) -> Result<bool, EntryFailure> {
        if !self.write_to_disk || entry.handle.dry_run() {
            return Ok(false);
        }

        let abs = self.output_root.join(rel);
        let write = || -> anyhow::Result<()> {
            if let Some(parent) = abs.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&abs, content)?;
            Ok(())
        };
        write()
            .with_context(|| format!("failed to write `{}`", abs.display()))
            .map_err(EntryFailure::Other)?;

        if entry.handle.verbose() {
            log!("content"; "{}", rel.display());
        }
        Ok(true)
    }
}

/// Output location of one page of a paginated entry.
///
/// Page 1 keeps the base location; later pages nest under their 1-based
/// number (`posts/index.html` -> `posts/2/index.html`).
fn page_output_path(base: &Path, index: usize) -> PathBuf {
    if index == 0 {
        return base.to_path_buf();
    }
    let page = index + 1;
    if base.file_name().is_some_and(|name| name == "index.html") {
        let parent = base.parent().unwrap_or(Path::new(""));
        return parent.join(page.to_string()).join("index.html");
    }
    match base.extension().and_then(|e| e.to_str()) {
        Some(ext) => base.with_extension(format!("{page}.{ext}")),
        None => base.join(page.to_string()),
    }
}
