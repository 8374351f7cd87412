//! CLI module for rtable
//!
//! Operator commands over the published configuration:
//! - validate: Check a configuration document offline
//! - show: Per-location copies and the majority
//! - publish: Write an edited configuration to every location
//! - move-to-head / enable-write / enable-read-write: Chain repair
//! - read-repair: Rewrite stale locations
//! - history: List dated copies at one location

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, RepairTarget};
pub use commands::{history, publish, read_repair, run, run_command, show, validate};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{error_response, ok_response, write_error, write_response};
