//! `shipyard sweep`: Reclaim the resources of every session.

use clap::Args;
use shipyard_sdk::SessionConfig;

use crate::output;

/// Arguments for the `sweep` command.
#[derive(Args, Debug)]
pub struct SweepArgs {}

/// Executes the `sweep` command.
///
/// Stops and removes every container and network carrying the domain label,
/// whichever session created it.
///
/// # Errors
///
/// Returns an error if the engine is unreachable or some resources could
/// not be reclaimed.
pub async fn execute(_args: SweepArgs, config: SessionConfig) -> anyhow::Result<()> {
    let session = super::open_session(None, config).await?;
    let report = session.sweep_remains().await;
    println!("{}", output::format_report(&report));
    if !report.is_clean() {
        anyhow::bail!("sweep left resources behind, see log output");
    }
    Ok(())
}
