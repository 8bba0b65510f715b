//! Render engine interfaces.
//!
//! The orchestrator never renders anything itself: it asks the
//! [`EngineRegistry`] whether a path has a matching engine (paths without one
//! are not templates) and drives the [`Engine`] through a template handle.
//!
//! Engines read sibling output through [`ContentLookup`]. Asking for content
//! that has not been produced yet is a legitimate ordering hazard, reported
//! as [`RenderError::ContentNotReady`] and resolved by the scheduler's retry
//! wave rather than by the engine.

pub mod basic;

use crate::source::SourcePath;
use crate::template::DataCascade;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Parsed source
// ============================================================================

/// Front matter recognized by the build pipeline.
///
/// Unknown keys are collected into `extra` and exposed to the engine's data
/// lookups untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FrontMatter {
    pub title: Option<String>,
    /// Another template whose rendered content wraps this one
    pub layout: Option<String>,
    pub permalink: Option<String>,
    /// Collections this entry is a member of
    pub tags: Vec<String>,
    /// Collection this entry consumes (lists/paginates over)
    pub collection: Option<String>,
    /// Number of output pages
    pub pagination: Option<usize>,
    /// Non-template files consumed as data
    pub data_files: Vec<String>,
    #[serde(flatten)]
    pub extra: toml::Table,
}

/// One parsed source file: front matter plus body.
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    pub front: FrontMatter,
    pub body: String,
    /// Other templates the body embeds, extracted at parse time so
    /// relevance checks never need a render
    pub includes: Vec<SourcePath>,
}

/// Page slot handed to the engine when an entry paginates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSlot {
    /// Zero-based page index
    pub index: usize,
    /// Total page count
    pub count: usize,
}

// ============================================================================
// Errors
// ============================================================================

/// A single render attempt's failure.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The render asked for another entry's output before it was produced.
    /// Recoverable: the scheduler retries the entry in its second wave.
    #[error("rendered content of `{0}` is not available yet")]
    ContentNotReady(SourcePath),

    /// Anything else the engine failed on.
    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

// ============================================================================
// Traits
// ============================================================================

/// Read access to sibling entries' rendered output during a wave.
pub trait ContentLookup: Sync {
    fn rendered(&self, path: &SourcePath) -> Option<Arc<str>>;
}

/// A render engine for one family of template files.
pub trait Engine: Send + Sync {
    /// Split raw file content into front matter and body.
    fn parse(&self, source: &SourcePath, raw: &str) -> anyhow::Result<ParsedSource>;

    /// Render one page of the parsed source.
    fn render(
        &self,
        source: &SourcePath,
        parsed: &ParsedSource,
        data: &DataCascade,
        page: Option<PageSlot>,
        content: &dyn ContentLookup,
    ) -> Result<String, RenderError>;
}

/// Maps source paths to engines. A path without an engine is not a template.
pub trait EngineRegistry: Send + Sync {
    fn engine_for(&self, path: &SourcePath) -> Option<Arc<dyn Engine>>;

    fn has_engine(&self, path: &SourcePath) -> bool {
        self.engine_for(path).is_some()
    }
}

// ============================================================================
// Extension-keyed registry
// ============================================================================

/// Registry keyed by lower-cased file extension.
#[derive(Default)]
pub struct ExtensionRegistry {
    engines: FxHashMap<String, Arc<dyn Engine>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry serving the built-in engine for every given extension.
    pub fn with_basic(extensions: &[String]) -> Self {
        let engine: Arc<dyn Engine> = Arc::new(basic::BasicEngine);
        let mut registry = Self::new();
        for ext in extensions {
            registry.insert(ext, engine.clone());
        }
        registry
    }

    pub fn insert(&mut self, extension: &str, engine: Arc<dyn Engine>) {
        self.engines
            .insert(extension.to_ascii_lowercase(), engine);
    }
}

impl EngineRegistry for ExtensionRegistry {
    fn engine_for(&self, path: &SourcePath) -> Option<Arc<dyn Engine>> {
        self.engines.get(&path.extension()?).cloned()
    }
}
