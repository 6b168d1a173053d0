mod config_commands;
mod replay_commands;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    switchyard_config::SwitchyardConfig,
    tracing::{debug, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "switchyard", about = "Switchyard: lane-based admission control and batching")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to use instead of discovering one.
    #[arg(long, global = true, env = "SWITCHYARD_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved lane table.
    Lanes {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Feed a JSON-lines file of work items through a dispatcher.
    Replay(replay_commands::ReplayArgs),
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries command output.
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Load the config named by `--config`, or discover one.
fn load_config(explicit: Option<&PathBuf>) -> anyhow::Result<(SwitchyardConfig, Option<PathBuf>)> {
    match explicit {
        Some(path) => {
            let config = switchyard_config::load_config(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            Ok((config, Some(path.clone())))
        },
        None => {
            let path = switchyard_config::find_config_file();
            debug!(path = ?path, "discovered config");
            Ok((switchyard_config::discover_and_load(), path))
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "switchyard starting");

    let (config, path) = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Lanes { json } => config_commands::lanes(&config, json),
        Commands::Check { verbose } => config_commands::check(&config, path, verbose),
        Commands::Replay(args) => replay_commands::replay(&config, args).await,
    }
}
