//! Site configuration management for `strata.toml`.
//!
//! # Sections
//!
//! | Section   | Purpose                                            |
//! |-----------|----------------------------------------------------|
//! | `[base]`  | Site metadata (title, author, url)                 |
//! | `[build]` | Paths, template extensions, passthrough rules      |
//! | `[watch]` | Watch-mode tuning (debounce, cooldown, rendering)  |
//! | `[extra]` | User-defined custom fields                         |
//!
//! # Example
//!
//! ```toml
//! [base]
//! title = "My Blog"
//! url = "https://example.com"
//!
//! [build]
//! content = "content"
//! output = "public"
//! extensions = ["md", "html"]
//! passthrough_extensions = ["css", "png"]
//!
//! [watch]
//! no_initial_render = true
//! ```

mod error;

pub use error::ConfigError;

use crate::cli::{Cli, Commands};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

// ============================================================================
// Defaults
// ============================================================================

fn default_content() -> PathBuf {
    PathBuf::from("content")
}

fn default_output() -> PathBuf {
    PathBuf::from("public")
}

fn default_data() -> PathBuf {
    PathBuf::from("data")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".strata")
}

fn default_extensions() -> Vec<String> {
    vec!["md".into(), "html".into()]
}

fn default_passthrough_extensions() -> Vec<String> {
    ["css", "js", "png", "jpg", "svg", "woff2"]
        .map(String::from)
        .to_vec()
}

fn default_passthrough_dirs() -> Vec<String> {
    vec!["static".into()]
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_cooldown_ms() -> u64 {
    800
}

// ============================================================================
// Sections
// ============================================================================

/// Basic site information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BaseConfig {
    pub title: Option<String>,
    pub author: Option<String>,
    pub url: Option<String>,
}

/// Build settings: paths and classification rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Content directory, relative to the project root
    pub content: PathBuf,

    /// Output directory
    pub output: PathBuf,

    /// Run-level data directory (TOML files merged into global data)
    pub data: PathBuf,

    /// Cache directory (persisted dependency graph)
    pub cache_dir: PathBuf,

    /// File extensions handled by a template engine
    pub extensions: Vec<String>,

    /// File extensions copied through untouched
    pub passthrough_extensions: Vec<String>,

    /// Directories whose files are always copied through untouched
    pub passthrough_dirs: Vec<String>,

    /// Render everything, write nothing
    pub dry_run: bool,

    /// Log every generated file
    pub verbose: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            content: default_content(),
            output: default_output(),
            data: default_data(),
            cache_dir: default_cache_dir(),
            extensions: default_extensions(),
            passthrough_extensions: default_passthrough_extensions(),
            passthrough_dirs: default_passthrough_dirs(),
            dry_run: false,
            verbose: false,
        }
    }
}

/// Watch-mode settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// Debounce window for file events
    pub debounce_ms: u64,

    /// Cooldown after a full rebuild before new events are accepted
    pub cooldown_ms: u64,

    /// Skip rendering untouched files on the first build of a watch session
    pub no_initial_render: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            cooldown_ms: default_cooldown_ms(),
            no_initial_render: false,
        }
    }
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure representing strata.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Absolute path to the config file (set after loading)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Project root (the config file's directory)
    #[serde(skip)]
    pub root: PathBuf,

    /// Basic site information
    pub base: BaseConfig,

    /// Build settings
    pub build: BuildConfig,

    /// Watch-mode settings
    pub watch: WatchConfig,

    /// User-defined extra fields
    pub extra: HashMap<String, toml::Value>,
}

impl SiteConfig {
    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: SiteConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration from file path.
    ///
    /// The project root is the config file's parent directory; all relative
    /// paths in `[build]` resolve against it.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        let mut config = Self::from_str(&content)?;
        config.config_path = path.to_path_buf();
        config.root = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        Ok(config)
    }

    /// Content directory resolved against the project root.
    pub fn content_root(&self) -> PathBuf {
        self.root.join(&self.build.content)
    }

    /// Output directory resolved against the project root.
    pub fn output_root(&self) -> PathBuf {
        self.root.join(&self.build.output)
    }

    /// Data directory resolved against the project root.
    pub fn data_root(&self) -> PathBuf {
        self.root.join(&self.build.data)
    }

    /// Cache directory resolved against the project root.
    pub fn cache_root(&self) -> PathBuf {
        self.root.join(&self.build.cache_dir)
    }

    /// Fold CLI flags into the loaded configuration.
    pub fn update_with_cli(&mut self, cli: &Cli) {
        match &cli.command {
            Commands::Build { build_args } | Commands::Watch { build_args, .. } => {
                if build_args.dry_run {
                    self.build.dry_run = true;
                }
                if build_args.verbose {
                    self.build.verbose = true;
                }
            }
            Commands::Data {} => {}
        }
        if let Commands::Watch {
            no_initial_render: true,
            ..
        } = &cli.command
        {
            self.watch.no_initial_render = true;
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build.extensions.is_empty() {
            return Err(ConfigError::Validation(
                "build.extensions must name at least one template extension".into(),
            ));
        }
        if self.build.content == self.build.output {
            return Err(ConfigError::Validation(
                "build.content and build.output must differ".into(),
            ));
        }
        if !self.content_root().is_dir() {
            return Err(ConfigError::Validation(format!(
                "content directory does not exist: {}",
                self.content_root().display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SiteConfig::default();
        assert_eq!(config.build.content, PathBuf::from("content"));
        assert_eq!(config.build.output, PathBuf::from("public"));
        assert_eq!(config.build.extensions, vec!["md", "html"]);
        assert!(!config.watch.no_initial_render);
        assert_eq!(config.watch.debounce_ms, 300);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = SiteConfig::from_str(
            r#"
[base]
title = "Blog"

[build]
output = "dist"

[watch]
no_initial_render = true
"#,
        )
        .unwrap();
        assert_eq!(config.base.title.as_deref(), Some("Blog"));
        assert_eq!(config.build.output, PathBuf::from("dist"));
        // Untouched sections keep their defaults
        assert_eq!(config.build.content, PathBuf::from("content"));
        assert!(config.watch.no_initial_render);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = SiteConfig::from_str("[build]\nnot_a_field = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_same_content_output() {
        let mut config = SiteConfig::default();
        config.build.output = config.build.content.clone();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let result = SiteConfig::from_path(Path::new("/nonexistent/strata.toml"));
        assert!(matches!(result, Err(ConfigError::Missing(_))));
    }
}
