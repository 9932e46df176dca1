//! CLI module for the `orch` tool.
//!
//! This module provides the command-line interface: a thin caller of the
//! resolve, plan and apply operations of the library.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
