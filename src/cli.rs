//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI parser for `issue-reconciler`.
#[derive(Debug, Parser)]
#[command(
    name = "issue-reconciler",
    version,
    about = "Keep tracker issues converged with declared issue records"
)]
pub struct Cli {
    /// The command to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Declare an issue from a YAML record file, or update its spec.
    Apply {
        /// Path to the record file.
        file: PathBuf,
    },
    /// Request deletion of a record; its issue is closed by the next pass.
    Delete {
        /// Record name.
        name: String,
    },
    /// List declared records with their finalizer and issue state.
    Status,
    /// Run the controller against the record store.
    Run {
        /// Reconcile every record once and exit.
        #[arg(long)]
        once: bool,
    },
}
