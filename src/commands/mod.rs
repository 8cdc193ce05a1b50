//! Command dispatch and handlers.

pub mod apply;
pub mod delete;
pub mod run;
pub mod status;

use crate::cli::Command;
use crate::config::Config;
use crate::context::ServiceContext;
use crate::error::Result;

/// Dispatch a parsed command to its handler with a live context.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the command fails.
pub fn dispatch(command: &Command) -> Result<()> {
    let ctx = ServiceContext::live(Config::from_env()?);
    dispatch_with_context(command, &ctx)
}

/// Dispatch a command with the given service context.
///
/// # Errors
///
/// Returns the selected handler's error.
pub fn dispatch_with_context(command: &Command, ctx: &ServiceContext) -> Result<()> {
    match command {
        Command::Apply { file } => apply::run(ctx, file),
        Command::Delete { name } => delete::run(ctx, name),
        Command::Status => status::run(ctx),
        Command::Run { once } => run::run(ctx, *once),
    }
}
