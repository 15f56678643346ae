//! `shipyard clean`: Reclaim the resources of one session.

use clap::Args;
use shipyard_sdk::SessionConfig;

use crate::output;

/// Arguments for the `clean` command.
#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Id of the session to clean up.
    #[arg(long)]
    pub session: String,
}

/// Executes the `clean` command.
///
/// # Errors
///
/// Returns an error if the engine is unreachable or some resources could
/// not be reclaimed.
pub async fn execute(args: CleanArgs, config: SessionConfig) -> anyhow::Result<()> {
    let session = super::open_session(Some(&args.session), config).await?;
    let report = session.cleanup().await;
    println!("{}", output::format_report(&report));
    if !report.is_clean() {
        anyhow::bail!("session {} was not fully cleaned up", args.session);
    }
    Ok(())
}
