//! `shipyard ps`: List labeled containers.

use anyhow::Context;
use clap::Args;
use shipyard_common::constants::SESSION_LABEL_KEY;
use shipyard_common::types::ContainerStatus;
use shipyard_sdk::SessionConfig;

use crate::output;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Show all containers (including stopped).
    #[arg(short, long)]
    pub all: bool,

    /// Only show containers of this session.
    #[arg(long)]
    pub session: Option<String>,
}

/// Executes the `ps` command.
///
/// Lists containers carrying the domain label, optionally narrowed to one
/// session, in a tabular format.
///
/// # Errors
///
/// Returns an error if the engine is unreachable or listing fails.
pub async fn execute(args: PsArgs, config: SessionConfig) -> anyhow::Result<()> {
    let session = super::open_session(args.session.as_deref(), config).await?;
    let mut filter = if args.session.is_some() {
        session.session_filter()
    } else {
        session.domain_filter()
    };
    if !args.all {
        filter = filter.with_status(ContainerStatus::Running);
    }

    let containers = session
        .engine()
        .list_containers(&filter, session.cancellation_token())
        .await
        .context("failed to list containers")?;

    if containers.is_empty() {
        println!("No containers found.");
        return Ok(());
    }

    println!("{:<14} {:<40} {:<34}", "CONTAINER ID", "NAME", "SESSION");
    for c in &containers {
        println!(
            "{:<14} {:<40} {:<34}",
            output::short_id(&c.id),
            c.name,
            c.labels.get(SESSION_LABEL_KEY).map_or("-", String::as_str)
        );
    }

    Ok(())
}
