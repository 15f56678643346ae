//! CLI command definitions and dispatch.

pub mod clean;
pub mod ps;
pub mod sweep;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use shipyard_common::types::SessionId;
use shipyard_engine::EngineClient;
use shipyard_engine::docker::DockerEngine;
use shipyard_sdk::{Session, SessionConfig};

/// Shipyard: reclaim the containers your functional tests left behind.
#[derive(Parser, Debug)]
#[command(name = "shipyard", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to a YAML session configuration. Environment variables are
    /// used when absent.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stop and remove every labeled container and network.
    Sweep(sweep::SweepArgs),
    /// Stop and remove the resources of one session.
    Clean(clean::CleanArgs),
    /// List labeled containers.
    Ps(ps::PsArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Sweep(args) => sweep::execute(args, config).await,
        Command::Clean(args) => clean::execute(args, config).await,
        Command::Ps(args) => ps::execute(args, config).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SessionConfig> {
    match path {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => SessionConfig::from_env().context("invalid configuration in environment"),
    }
}

/// Connects to the local Docker engine.
pub(crate) fn docker() -> anyhow::Result<Arc<dyn EngineClient>> {
    let engine = DockerEngine::connect_local().context("failed to configure Docker client")?;
    Ok(Arc::new(engine))
}

/// Opens a session acting on `id`, or on a fresh id when absent.
pub(crate) async fn open_session(
    id: Option<&str>,
    config: SessionConfig,
) -> anyhow::Result<Session> {
    let engine = docker()?;
    let session = match id {
        Some(id) => Session::resume(SessionId::new(id), engine, config).await,
        None => Session::with_engine(engine, config).await,
    }
    .context("cannot reach the container engine")?;
    cancel_on_ctrl_c(&session)?;
    Ok(session)
}

/// Cancels the session's waits when the user presses Ctrl+C. Removal still
/// runs to completion.
fn cancel_on_ctrl_c(session: &Session) -> anyhow::Result<()> {
    let token = session.cancellation_token().clone();
    ctrlc::set_handler(move || {
        eprintln!("  Interrupted, skipping remaining waits...");
        token.cancel();
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn binary_is_named_shipyard() {
        assert_eq!(Cli::command().get_name(), env!("CARGO_BIN_NAME"));
    }

    #[test]
    fn clean_requires_session() {
        assert!(Cli::try_parse_from(["shipyard", "clean"]).is_err());
        let cli = Cli::try_parse_from(["shipyard", "clean", "--session", "abc"]).unwrap();
        assert!(matches!(cli.command, Command::Clean(ref args) if args.session == "abc"));
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["shipyard", "ps", "--config", "shipyard.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("shipyard.yaml")));
    }

    #[test]
    fn missing_config_file_is_reported() {
        let err = load_config(Some(Path::new("/nonexistent/shipyard.yaml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/shipyard.yaml"));
    }
}
