//! CLI argument definitions using clap
//!
//! Commands:
//! - rtable validate --config <path>
//! - rtable show --settings <path>
//! - rtable publish --settings <path> --config <path>
//! - rtable move-to-head --settings <path> --view <name> --account <name>
//! - rtable enable-write --settings <path> --view <name> --account <name>
//! - rtable enable-read-write --settings <path> --view <name> --account <name>
//! - rtable read-repair --settings <path>
//! - rtable history --settings <path> --location <index>

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// rtable - operator tool for chain-replicated table configurations
#[derive(Parser, Debug)]
#[command(name = "rtable")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Target of a chain repair
#[derive(Args, Debug, Clone)]
pub struct RepairTarget {
    /// Path to client settings file
    #[arg(long, default_value = "./rtable.json")]
    pub settings: PathBuf,

    /// View to repair
    #[arg(long)]
    pub view: String,

    /// Storage account of the replica
    #[arg(long)]
    pub account: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check a configuration document without publishing it
    Validate {
        /// Path to configuration document
        #[arg(long)]
        config: PathBuf,
    },

    /// Show what every blob location holds and the majority configuration
    Show {
        /// Path to client settings file
        #[arg(long, default_value = "./rtable.json")]
        settings: PathBuf,
    },

    /// Publish a configuration document to every blob location
    Publish {
        /// Path to client settings file
        #[arg(long, default_value = "./rtable.json")]
        settings: PathBuf,

        /// Path to configuration document
        #[arg(long)]
        config: PathBuf,
    },

    /// Take a replica out of the write path and park it at the head
    MoveToHead(RepairTarget),

    /// Start re-admitting the head replica into the write path
    EnableWrite(RepairTarget),

    /// Finish re-admitting a caught-up head replica
    EnableReadWrite(RepairTarget),

    /// Rewrite stale blob locations with the majority configuration
    ReadRepair {
        /// Path to client settings file
        #[arg(long, default_value = "./rtable.json")]
        settings: PathBuf,
    },

    /// List configuration history at one blob location
    History {
        /// Path to client settings file
        #[arg(long, default_value = "./rtable.json")]
        settings: PathBuf,

        /// Blob location index
        #[arg(long, default_value_t = 0)]
        location: usize,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
