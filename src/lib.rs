//! Core library entry for the `issue-reconciler` CLI.
//!
//! Declared issue records live in a [`store`]; the [`controller`] keeps one
//! tracker issue per record converged with it through the [`ports`], closing
//! the issue before a deleted record is allowed to disappear.

pub mod adapters;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod ports;
pub mod resource;
pub mod store;

pub use error::{Error, Result};

use clap::Parser;

/// Run the CLI with the provided arguments.
///
/// Help and version requests are printed and count as success.
///
/// # Errors
///
/// Returns an error string when argument parsing fails or command execution fails.
pub fn run<I, T>(args: I) -> std::result::Result<(), String>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = match cli::Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => {
            print!("{err}");
            return Ok(());
        }
        Err(err) => return Err(err.to_string()),
    };
    commands::dispatch(&cli.command).map_err(|err| err.to_string())
}
