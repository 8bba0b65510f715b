//! Run-level global data.
//!
//! TOML files under the data directory are merged into one table, keyed by
//! file stem (`data/site.toml` becomes `site.*`). The table is loaded once
//! per run and re-bound to every cached template handle, so a changed data
//! file is visible to cascades without recreating handles.

use crate::log;
use rustc_hash::FxHashMap;
use std::path::Path;
use walkdir::WalkDir;

/// Immutable snapshot of run-level data, shared by all handles of one run.
#[derive(Debug, Default)]
pub struct RunData {
    tables: FxHashMap<String, toml::Table>,
}

impl RunData {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every `*.toml` file under `dir` into the snapshot.
    ///
    /// Fail-safe: an unreadable or unparsable file is logged and skipped, it
    /// never aborts a build.
    pub fn load(dir: &Path) -> Self {
        let mut tables = FxHashMap::default();
        if !dir.is_dir() {
            return Self { tables };
        }

        for entry in WalkDir::new(dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "toml"))
        {
            let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match std::fs::read_to_string(entry.path())
                .map_err(anyhow::Error::from)
                .and_then(|raw| toml::from_str::<toml::Table>(&raw).map_err(Into::into))
            {
                Ok(table) => {
                    tables.insert(stem.to_string(), table);
                }
                Err(e) => {
                    log!("warn"; "skipping data file {}: {:#}", entry.path().display(), e);
                }
            }
        }

        Self { tables }
    }

    /// Look up a dotted key, e.g. `site.title`.
    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        let (table, rest) = key.split_once('.')?;
        let mut value = self.tables.get(table)?.get(rest.split('.').next()?)?;
        for part in rest.split('.').skip(1) {
            value = value.as_table()?.get(part)?;
        }
        Some(value)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
