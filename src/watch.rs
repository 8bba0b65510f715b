//! File system watcher driving incremental builds.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      Event Loop                            │
//! │                                                            │
//! │  ┌──────────┐    ┌──────────┐    ┌──────────────────────┐  │
//! │  │ notify   │───▶│ Debouncer│───▶│   handle_changes()   │  │
//! │  │ events   │    │ (300ms)  │    │                      │  │
//! │  └──────────┘    └──────────┘    │  config/data changed │  │
//! │                                  │   → full rebuild     │  │
//! │                                  │  content changed     │  │
//! │                                  │   → incremental      │  │
//! │                                  └──────────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//! ```

use crate::build::{BuildError, BuildSummary, Orchestrator};
use crate::config::SiteConfig;
use crate::log;
use crate::source::SourcePath;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use rustc_hash::FxHashSet;
use std::{
    env,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

// =============================================================================
// Path Utilities
// =============================================================================

/// Check if path is a temp/backup file (editor artifacts).
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

/// Normalize a path to absolute form for reliable comparison.
///
/// Watched roots are canonicalized up front, so incoming watcher paths must
/// be too before prefix checks.
fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
        }
    })
}

const fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    )
}

// =============================================================================
// Debounce State
// =============================================================================

/// Batches rapid file events with debouncing and rebuild cooldown.
struct Debouncer {
    pending: FxHashSet<PathBuf>,
    last_event: Option<Instant>,
    last_rebuild: Option<Instant>,
    debounce: Duration,
    cooldown: Duration,
}

impl Debouncer {
    fn new(debounce_ms: u64, cooldown_ms: u64) -> Self {
        Self {
            pending: FxHashSet::default(),
            last_event: None,
            last_rebuild: None,
            debounce: Duration::from_millis(debounce_ms),
            cooldown: Duration::from_millis(cooldown_ms),
        }
    }

    fn in_cooldown(&self) -> bool {
        self.last_rebuild.is_some_and(|t| t.elapsed() < self.cooldown)
    }

    fn add(&mut self, event: Event) {
        for path in event.paths {
            if !is_temp_file(&path) {
                self.pending.insert(path);
            }
        }
        self.last_event = Some(Instant::now());
    }

    fn ready(&self) -> bool {
        !self.pending.is_empty() && self.last_event.is_some_and(|t| t.elapsed() >= self.debounce)
    }

    fn take(&mut self) -> Vec<PathBuf> {
        self.last_event = None;
        self.pending.drain().collect()
    }

    fn mark_rebuild(&mut self) {
        self.last_rebuild = Some(Instant::now());
    }

    fn timeout(&self) -> Duration {
        if self.pending.is_empty() {
            Duration::from_secs(60)
        } else {
            self.debounce
        }
    }
}

// =============================================================================
// Event Handler
// =============================================================================

struct WatchedRoots {
    content: PathBuf,
    data: PathBuf,
    config_path: PathBuf,
}

/// Process batched changes. Returns true if a full rebuild ran (for cooldown).
fn handle_changes(paths: &[PathBuf], orchestrator: &Orchestrator, roots: &WatchedRoots) -> bool {
    if paths.is_empty() {
        return false;
    }

    // Config and run-level data feed every cascade: precise invalidation is
    // impossible, rebuild everything
    let mut full_rebuild_trigger: Option<&'static str> = None;
    let mut changed: Vec<SourcePath> = Vec::new();

    for path in paths {
        let path = normalize_path(path);
        if path == roots.config_path {
            full_rebuild_trigger = Some("config");
        } else if path.starts_with(&roots.data) {
            full_rebuild_trigger = Some("data");
        } else if let Ok(rel) = path.strip_prefix(&roots.content) {
            changed.push(SourcePath::new(rel));
        }
    }

    if let Some(trigger) = full_rebuild_trigger {
        log!("watch"; "{trigger} changed, rebuilding...");
        return report(orchestrator.run_full_build());
    }

    for path in changed {
        log!("watch"; "{path}");
        report(orchestrator.run_incremental_build(&path));
    }
    false
}

/// Log a run result. Returns true on success.
fn report(result: Result<BuildSummary, BuildError>) -> bool {
    match result {
        Ok(summary) if summary.is_success() => {
            log!("watch"; "{} written, {} skipped", summary.written, summary.skipped);
            true
        }
        Ok(summary) => {
            for failure in &summary.failures {
                log!("error"; "{}", failure.chain());
            }
            false
        }
        Err(err) => {
            log!("error"; "{}", err.chain());
            false
        }
    }
}

// =============================================================================
// Public API
// =============================================================================

/// Start blocking file watcher with debouncing and live rebuild.
pub fn watch_for_changes_blocking(
    orchestrator: &Orchestrator,
    config: &SiteConfig,
) -> Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx).context("Failed to create file watcher")?;

    let roots = WatchedRoots {
        content: normalize_path(&config.content_root()),
        data: normalize_path(&config.data_root()),
        config_path: normalize_path(&config.config_path),
    };

    watcher
        .watch(&roots.content, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch {}", roots.content.display()))?;
    if roots.data.exists() {
        watcher.watch(&roots.data, RecursiveMode::Recursive)?;
    }
    if roots.config_path.exists() {
        watcher.watch(&roots.config_path, RecursiveMode::NonRecursive)?;
    }
    log!("watch"; "watching {}", roots.content.display());

    let mut debouncer = Debouncer::new(config.watch.debounce_ms, config.watch.cooldown_ms);

    loop {
        match rx.recv_timeout(debouncer.timeout()) {
            Ok(Ok(event)) if is_relevant(&event) && !debouncer.in_cooldown() => {
                debouncer.add(event);
            }
            Ok(Err(e)) => log!("watch"; "error: {e}"),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) if debouncer.ready() => {
                if handle_changes(&debouncer.take(), orchestrator, &roots) {
                    debouncer.mark_rebuild();
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            // Other cases: irrelevant events, timeout without ready, etc.
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_files_filtered() {
        assert!(is_temp_file(Path::new("a.swp")));
        assert!(is_temp_file(Path::new("a.md~")));
        assert!(is_temp_file(Path::new(".hidden")));
        assert!(!is_temp_file(Path::new("a.md")));
    }

    #[test]
    fn test_debouncer_batches_until_quiet() {
        let mut debouncer = Debouncer::new(0, 0);
        assert!(!debouncer.ready());

        debouncer.add(Event::new(EventKind::Modify(notify::event::ModifyKind::Any)).add_path(
            PathBuf::from("a.md"),
        ));
        assert!(debouncer.ready());
        assert_eq!(debouncer.take().len(), 1);
        assert!(!debouncer.ready());
    }
}
