//! topicmesh CLI — run a master, generic nodes or the arm demo nodes.

mod arm;
mod cli;
mod cmd;
mod shell;
mod table;
mod ui;

use crate::cli::{Cli, Commands};
use crate::cmd::node::NodeOptions;
use crate::cmd::CommandError;
use clap::Parser;
use std::process::ExitCode;
use topicmesh_core::config::load_config;
use topicmesh_types::config::MeshConfig;

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Load the config while only warnings are printed; the real subscriber
/// depends on the `log_level` it contains.
fn load_config_quietly(cli: &Cli) -> MeshConfig {
    let bootstrap = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::with_default(bootstrap, || load_config(cli.config.as_deref()))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = load_config_quietly(&cli);
    init_tracing(&config.log_level);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            ui::error(&format!("Failed to start the async runtime: {e}"));
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(cli.command, &config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ui::error_with_fix(&e.to_string(), e.fix());
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Commands, config: &MeshConfig) -> Result<(), CommandError> {
    match command {
        Commands::Master { listen, no_shell } => cmd::master::run(config, listen, !no_shell).await,
        Commands::Node {
            name,
            endpoints,
            pub_topic,
            sub_topic,
            interval_secs,
        } => {
            let options = NodeOptions {
                name,
                endpoints,
                pub_topic,
                sub_topic,
                interval_secs,
            };
            cmd::node::run(config, options).await
        }
        Commands::ArmPublisher {
            name,
            endpoints,
            rate_hz,
        } => cmd::arm::run_publisher(config, &name, &endpoints, rate_hz).await,
        Commands::ArmMonitor { name, endpoints } => {
            cmd::arm::run_monitor(config, &name, &endpoints).await
        }
    }
}
