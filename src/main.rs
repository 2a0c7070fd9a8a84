use clap::{Parser, Subcommand};

mod config;
mod risk_task;
mod supervisor;

use config::AppConfig;

/// Murakumo — continuous OT/ICS network topology discovery
#[derive(Parser, Debug)]
#[command(name = "murakumo", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the telemetry pipeline (the default).
    Run,
    /// Validate configuration and targets, then exit.
    CheckConfig,
}

/// Exit codes: 0 healthy shutdown, 1 fatal configuration error,
/// 2 fatal runtime error.
fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("configuration error: {e}");
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::CheckConfig => {
            println!(
                "configuration ok: {} snmp target(s), {} modbus target(s), {} zone(s)",
                config.targets.snmp.len(),
                config.targets.modbus.len(),
                config.targets.zones.len()
            );
        }
        Command::Run => {
            log::info!("murakumo v{} starting", env!("CARGO_PKG_VERSION"));
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(e) => {
                    log::error!("cannot start runtime: {e}");
                    std::process::exit(2);
                }
            };
            if let Err(e) = runtime.block_on(supervisor::run(config)) {
                log::error!("fatal: {e:#}");
                std::process::exit(2);
            }
        }
    }
}
