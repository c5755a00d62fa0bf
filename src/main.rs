use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use relay_probe::configuration::config::{Config, ProbeArgs};
use relay_probe::controller::controller_handler::ConnectivityController;
use relay_probe::network::echo_server::run_echo_server;

#[derive(Parser)]
#[command(name = "relay-probe")]
#[command(version)]
#[command(about = "Pre-call diagnostics of a relay path: RTT, loss and throughput")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one diagnostic session and print the summary as JSON
    Run(ProbeArgs),
    /// Reflect every UDP datagram back to its sender
    Echo {
        #[arg(long, default_value = "0.0.0.0:3478")]
        bind: SocketAddr,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Echo { bind } => {
            if let Err(e) = run_echo_server(bind).await {
                error!("Echo server stopped: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn run(args: ProbeArgs) {
    info!("Importing configuration");
    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration: {}", e);
            std::process::exit(1);
        }
    };

    let servers = config.ice_servers.clone();
    let controller = Arc::new(ConnectivityController::from_config(config));

    // Ctrl-C is treated like a starting call: the session is cut short but still reported
    let interrupt = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finalizing the session");
                controller.call_starts();
            }
        })
    };

    let outcome = controller.start(&servers).await;
    interrupt.abort();

    match outcome {
        Ok(summary) => {
            print_json(&summary);
            if args.report {
                if let Some(report) = controller.last_report() {
                    print_json(&report);
                }
            }
        }
        Err(e) => {
            error!("{}", e);
            if args.report {
                if let Some(report) = controller.last_report() {
                    print_json(&report);
                }
            }
            std::process::exit(1);
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Unable to serialize output: {}", e),
    }
}
