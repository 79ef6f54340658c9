use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use microrts_core::cli::{print_banner, Cli};
use microrts_core::error::Error;
use microrts_core::trainers::{run_cli, InterruptFlag};
use microrts_core::ProcessEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = parse_cli(std::env::args_os())?;
    init_logging(cli.debug);
    print_banner();

    let config = cli.resolve()?;

    let interrupt = InterruptFlag::new();
    let watcher = interrupt.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Interrupt received, finishing the current step and saving");
        watcher.raise();
    });

    let summary = tokio::task::spawn_blocking(move || run_cli(config, ProcessEngine::spawn, interrupt))
        .await
        .context("training task panicked")??;

    if summary.stopped_early {
        info!("Run interrupted after {} timesteps", summary.num_timesteps);
    }
    Ok(())
}

/// Bad arguments become `InvalidArgument`; `--help` and `--version` print and exit.
fn parse_cli<I, T>(args: I) -> Result<Cli, Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(cli) => Ok(cli),
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => Err(Error::from_clap(e)),
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_map_size_is_invalid_argument() {
        let err = parse_cli(["microrts-train", "results", "7"]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_unknown_flag_is_invalid_argument() {
        let err = parse_cli(["microrts-train", "results", "10", "--learning-rate", "0.1"]).unwrap_err();
        match err {
            Error::InvalidArgument(message) => assert!(message.contains("--learning-rate")),
            other => panic!("expected InvalidArgument, got {}", other),
        }
    }

    #[test]
    fn test_positional_arguments_parse() {
        let cli = parse_cli(["microrts-train", "results", "4"]).unwrap();
        assert!(!cli.debug);
        assert!(!cli.mask);
    }
}
