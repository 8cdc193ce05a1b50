//! `issue-reconciler run` command.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::context::ServiceContext;
use crate::controller::{Controller, ControllerConfig, SweepSummary};
use crate::error::{Error, Result};

/// Execute the `run` command.
///
/// With `once`, reconciles every record a single time and prints the tally.
/// Otherwise runs the controller until interrupted with Ctrl-C.
///
/// # Errors
///
/// Returns an error if no tracker credential is configured, the runtime
/// cannot start, or the store cannot be listed.
pub fn run(ctx: &ServiceContext, once: bool) -> Result<()> {
    let controller = Controller::new(
        Arc::new(ctx.store()),
        ctx.issues()?,
        ControllerConfig::from(&ctx.config),
    );
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::config(format!("failed to start async runtime: {e}")))?;

    if once {
        let summary = runtime.block_on(controller.run_once())?;
        println!("{}", describe(&summary));
        return Ok(());
    }

    runtime.block_on(async {
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupt received"),
                Err(e) => warn!(error = %e, "cannot listen for interrupts; stopping"),
            }
            let _ = stop_tx.send(true);
        });
        controller.run(stop_rx).await
    })
}

fn describe(summary: &SweepSummary) -> String {
    format!(
        "{} synced, {} released, {} invalid, {} failed",
        summary.synced, summary.released, summary.invalid, summary.failed
    )
}
