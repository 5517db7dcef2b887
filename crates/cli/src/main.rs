mod events_commands;
mod jobs_commands;
mod processor;
mod run;
mod services;

use std::{path::PathBuf, time::Duration};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    switchyard_config::SwitchyardConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use crate::services::Services;

#[derive(Parser)]
#[command(name = "switchyard", about = "Switchyard: message dispatcher and scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of searching the standard locations.
    #[arg(long, global = true, env = "SWITCHYARD_CONFIG")]
    config: Option<PathBuf>,

    /// Custom data directory (overrides config and the platform default).
    #[arg(long, global = true, env = "SWITCHYARD_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the dispatcher (default when no subcommand is provided).
    Run {
        /// Delay before plain messages are echoed, so `/stop` has something to cancel.
        #[arg(long, default_value_t = 0)]
        echo_delay_ms: u64,
    },
    /// Scheduled job management.
    Jobs {
        #[command(subcommand)]
        action: jobs_commands::JobsAction,
    },
    /// Calendar event management.
    Events {
        #[command(subcommand)]
        action: events_commands::EventsAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so the stdio channel owns stdout.
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

fn load_config(cli: &Cli) -> anyhow::Result<SwitchyardConfig> {
    match &cli.config {
        Some(path) => switchyard_config::load_config(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(switchyard_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    let config = load_config(&cli)?;
    let data_dir = switchyard_config::resolve_data_dir(&config, cli.data_dir.as_deref());

    match cli.command.unwrap_or(Commands::Run { echo_delay_ms: 0 }) {
        Commands::Run { echo_delay_ms } => {
            info!(version = env!("CARGO_PKG_VERSION"), "switchyard starting");
            run::run(&config, &data_dir, Duration::from_millis(echo_delay_ms)).await
        },
        Commands::Jobs { action } => {
            let services = Services::open(&config, &data_dir);
            jobs_commands::handle_jobs(&services, action).await
        },
        Commands::Events { action } => {
            let services = Services::open(&config, &data_dir);
            events_commands::handle_events(&services, action).await
        },
    }
}
