//! Spangate - Entry point
//!
//! This is the main binary for the spangate sidecar.

use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spangate::{SidecarConfig, SidecarServer};

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("spangate {}", spangate::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Spangate - Spanner identity and lifecycle sidecar

USAGE:
    spangate [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    SPANGATE_LISTEN_PORT         Sidecar listen port (default: 8080)
    SPANGATE_SPANNER_ENDPOINT    Spanner API base URL (default: http://localhost:9020)
    SPANGATE_PROJECT_ID          Default tenant project id
    SPANGATE_INSTANCE_ID         Default instance id
    SPANGATE_DATABASE_ID         Default database id
    SPANGATE_PROBE_TIMEOUT_MS    Readiness probe timeout in ms (default: 1500)
    SPANGATE_FORWARD_TIMEOUT     Forwarded call timeout in seconds (default: 30)
    SPANGATE_LOG_LEVEL           Log level when RUST_LOG is unset (default: info)

EXAMPLES:
    # Run with configuration file
    spangate --config /etc/spangate/config.toml

    # Run with environment variables
    SPANGATE_PROJECT_ID=my-project spangate
"
    );
}

#[tokio::main]
async fn main() {
    // Parse arguments
    let args = Args::parse();

    // Load configuration
    let config = match args.config {
        Some(path) => match SidecarConfig::from_file(&path) {
            Ok(config) => config.with_env_overrides(),
            Err(e) => {
                eprintln!("Failed to load configuration: {e}");
                std::process::exit(1);
            }
        },
        None => SidecarConfig::default().with_env_overrides(),
    };

    // Initialize tracing
    let default_filter = format!("spangate={},warn", config.telemetry.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!("Starting spangate v{}", spangate::VERSION);
    info!(
        "Listening on {}:{}",
        config.server.listen_addr, config.server.listen_port
    );

    // Create and run server
    let server = SidecarServer::new(config);
    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
