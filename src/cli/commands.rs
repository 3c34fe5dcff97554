//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Hostwright - Declarative hosting resource manager.
#[derive(Parser, Debug)]
#[command(name = "hostwright")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "HOSTWRIGHT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Run against an in-memory sandbox persisted to this file instead of
    /// the hosting API.
    #[arg(long, global = true, env = "HOSTWRIGHT_SANDBOX")]
    pub sandbox: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new Hostwright project.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the configuration.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Compute and display the execution plan.
    Plan {
        /// Plan from the recorded state without reading resources back.
        #[arg(long)]
        no_refresh: bool,
    },

    /// Apply the execution plan.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Stop at the first failed action.
        #[arg(long)]
        fail_fast: bool,

        /// Plan from the recorded state without reading resources back.
        #[arg(long)]
        no_refresh: bool,
    },

    /// Re-read every managed resource and record what changed.
    Refresh,

    /// Show managed resources.
    Status,

    /// Check for drift between configuration and remote resources.
    Drift,

    /// Delete every managed resource.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Query read-only data sources.
    Lookup {
        /// Lookup subcommand.
        #[command(subcommand)]
        command: LookupCommands,
    },

    /// Manage recorded state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// Data source lookups.
#[derive(Subcommand, Debug)]
pub enum LookupCommands {
    /// Find a region by code.
    Region {
        /// Region code (e.g. `FR-SD5`).
        code: String,
    },

    /// Find an image by name within a region.
    Image {
        /// Image label.
        name: String,

        /// Region code.
        #[arg(short, long)]
        region: String,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show current state.
    Show,

    /// Lock the state.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Force unlock (dangerous).
        #[arg(long)]
        force: bool,
    },

    /// Forget a resource without deleting it remotely.
    Rm {
        /// Resource address (`kind.name`, e.g. `vm.web`).
        address: String,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per log line.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_apply_flags() {
        let cli = Cli::try_parse_from([
            "hostwright",
            "--sandbox",
            "world.json",
            "--output",
            "json",
            "apply",
            "--yes",
            "--fail-fast",
        ])
        .expect("arguments should parse");

        assert_eq!(cli.sandbox, Some(PathBuf::from("world.json")));
        assert!(matches!(cli.output, OutputFormat::Json));
        assert!(matches!(
            cli.command,
            Commands::Apply {
                yes: true,
                fail_fast: true,
                no_refresh: false
            }
        ));
    }

    #[test]
    fn test_parses_lookup_image() {
        let cli = Cli::try_parse_from([
            "hostwright",
            "lookup",
            "image",
            "Debian 9 64 bits (HVM)",
            "--region",
            "FR-SD2",
        ])
        .expect("arguments should parse");

        let Commands::Lookup {
            command: LookupCommands::Image { name, region },
        } = cli.command
        else {
            panic!("expected an image lookup");
        };
        assert_eq!(name, "Debian 9 64 bits (HVM)");
        assert_eq!(region, "FR-SD2");
    }
}
