//! Command-line interface.
//!
//! Command definitions and output formatting for the `stratus` binary.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
