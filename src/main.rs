//! bundle-broker CLI entry point
//!
//! Dispatches to subcommands. The hidden `worker` subcommand is the build
//! worker process; its stdout is the protocol channel, so all logging goes
//! to stderr.

use bundle_broker::cli::{Cli, Commands};
use bundle_broker::config::ConfigManager;
use bundle_broker::error::BrokerResult;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> BrokerResult<()> {
    let cli = Cli::parse();

    // The worker takes everything from its arguments
    if let Commands::Worker(args) = cli.command {
        init_logging(cli.verbose, "text");
        return bundle_broker::cli::commands::worker(args).await;
    }

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config.general.log_format);
    debug!("Using config {}", config_manager.path().display());

    match cli.command {
        Commands::Worker(_) => unreachable!("Worker handled above"),
        Commands::Bundle(args) => bundle_broker::cli::commands::bundle(args, &config, cli.verbose).await,
        Commands::Cache(args) => bundle_broker::cli::commands::cache(args, &config).await,
        Commands::Config(args) => bundle_broker::cli::commands::config(args, &config_manager, &config).await,
        Commands::Clean => bundle_broker::cli::commands::clean(&config).await,
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `RUST_LOG` wins when set
fn init_logging(verbose: u8, format: &str) {
    let default = match verbose {
        0 => "bundle_broker=warn",
        1 => "bundle_broker=info",
        _ => "bundle_broker=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
