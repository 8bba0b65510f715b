//! Build error taxonomy.

use crate::graph::GraphError;
use crate::passthrough::CopyError;
use crate::source::SourcePath;
use std::path::PathBuf;
use thiserror::Error;

/// Errors of one build run.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No configuration handle at construction; no run is possible.
    #[error("no configuration available, cannot build")]
    ConfigMissing,

    /// Passthrough copy failed. Reported alongside template results, never
    /// conflated with them and never aborting generation.
    #[error("passthrough copy failed")]
    Copy(#[from] CopyError),

    /// Registration or persistence of the dependency graph failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// One entry's generation failed. Fatal to the run but isolated: sibling
    /// entries still complete and keep their outputs.
    #[error("generation failed for `{input}` -> `{output}` (wave {wave})")]
    TemplateGeneration {
        input: SourcePath,
        output: PathBuf,
        wave: u8,
        #[source]
        source: anyhow::Error,
    },
}

impl BuildError {
    /// Render the full cause chain on one line for log output.
    pub fn chain(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}
