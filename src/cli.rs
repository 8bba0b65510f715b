//! Command-line interface definitions.
//!
//! Defines all CLI arguments and subcommands using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Strata static site generator CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Project root directory
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Config file name (default: strata.toml)
    #[arg(short = 'C', long, default_value = "strata.toml")]
    pub config: PathBuf,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Shared build arguments for Build and Watch commands
#[derive(clap::Args, Debug, Clone)]
pub struct BuildArgs {
    /// Render everything but write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Log every generated file
    #[arg(short, long)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Build the whole site
    Build {
        #[command(flatten)]
        build_args: BuildArgs,
    },

    /// Build, then rebuild incrementally on change
    Watch {
        #[command(flatten)]
        build_args: BuildArgs,

        /// Skip rendering untouched files on the very first build
        #[arg(long)]
        no_initial_render: bool,
    },

    /// Generate all content in memory and print it as JSON
    Data {},
}

#[allow(unused)]
impl Cli {
    pub const fn is_watch(&self) -> bool {
        matches!(self.command, Commands::Watch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build() {
        let cli = Cli::try_parse_from(["strata", "build", "--dry-run"]).unwrap();
        match cli.command {
            Commands::Build { build_args } => assert!(build_args.dry_run),
            other => panic!("expected Build, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_watch_flags() {
        let cli = Cli::try_parse_from(["strata", "watch", "--no-initial-render"]).unwrap();
        assert!(cli.is_watch());
        match cli.command {
            Commands::Watch {
                no_initial_render, ..
            } => assert!(no_initial_render),
            other => panic!("expected Watch, got {other:?}"),
        }
    }

    #[test]
    fn test_no_args_is_error() {
        assert!(Cli::try_parse_from(["strata"]).is_err());
    }
}
