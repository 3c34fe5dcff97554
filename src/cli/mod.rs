//! CLI module for the Hostwright tool.
//!
//! This module provides the command-line interface for managing
//! hosting resources.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, LookupCommands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
