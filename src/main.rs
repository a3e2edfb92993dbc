/// Cluster configuration validator.
///
/// The controller and robot run inside their deployment images with a real
/// cluster adapter; this binary ships alongside them so operators can check
/// a configuration document before writing it to the cluster.
use clap::{Parser, Subcommand};
use ndi::ConfigRoot;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ndi")]
#[command(about = "Swarm ingress control plane utilities", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(global = true, short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a cluster configuration file
    Validate {
        /// Path to the YAML configuration document
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    match cli.command {
        Commands::Validate { file } => {
            let data = match std::fs::read_to_string(&file) {
                Ok(data) => data,
                Err(e) => {
                    eprintln!("Could not read {}: {}", file.display(), e);
                    return ExitCode::FAILURE;
                }
            };

            match ConfigRoot::from_yaml(&data) {
                Ok(config) => {
                    println!("Config valid");
                    println!(
                        "  acme account: {} (tos accepted: {})",
                        config.acme.email, config.acme.accept_tos
                    );
                    println!(
                        "  services: {}, {}, {}, {}",
                        config.services.account.name,
                        config.services.challenge.name,
                        config.services.nginx.name,
                        config.services.robot.name
                    );
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Config invalid: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}
