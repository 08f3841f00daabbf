//! fleetcheck entry point.
//!
//! Runs the loopback fleet scenario by default. Ctrl+C cancels the
//! remaining rounds; the guaranteed-cleanup phase still tears every
//! started instance down before the process exits.

use std::process::ExitCode;

use tokio_util::sync::CancellationToken;

use fleetcheck::config;
use fleetcheck::fleet::FleetOrchestrator;
use fleetcheck::loopback::build_loopback_fleet;
use fleetcheck::telemetry::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("run");

    match command {
        "run" | "" => run_fleet().await,
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => {
                    print_config(&config::load());
                    ExitCode::SUCCESS
                }
                "defaults" => {
                    print_config(&config::HarnessConfig::default());
                    ExitCode::SUCCESS
                }
                _ => {
                    eprintln!("Unknown config subcommand: {subcommand}");
                    ExitCode::FAILURE
                }
            }
        }
        "version" | "--version" | "-V" => {
            println!("fleetcheck {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {command}");
            print_usage();
            ExitCode::FAILURE
        }
    }
}

async fn run_fleet() -> ExitCode {
    let cfg = config::load();

    if let Err(e) = init_logging(&LogConfig::from_format(cfg.log_format)) {
        eprintln!("logging init failed: {e}");
        return ExitCode::FAILURE;
    }

    let scratch = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("scratch dir creation failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let mut fixture = match build_loopback_fleet(&cfg, scratch.path(), &cancel) {
        Ok(fixture) => fixture,
        Err(e) => {
            eprintln!("fleet setup failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    let members = std::mem::take(&mut fixture.members);

    // Ctrl+C stops further rounds; cleanup still runs for every instance.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling remaining rounds");
            signal_cancel.cancel();
        }
    });

    let orchestrator = FleetOrchestrator::new(
        cfg,
        members,
        scratch.path().to_path_buf(),
        cancel.clone(),
    );
    let report = orchestrator.run().await;

    fixture.shutdown().await;

    println!("{}", report.summary());
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_config(cfg: &config::HarnessConfig) {
    match serde_json::to_string_pretty(&cfg.effective_config()) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("config serialization failed: {e}"),
    }
}

fn print_usage() {
    eprintln!(
        "fleetcheck - MMDS and echo-channel conformance harness v{}

USAGE:
    fleetcheck [COMMAND]

COMMANDS:
    run          Run the fleet scenario (default when no command given)
    config show      Show effective configuration
    config defaults  Show default configuration
    version      Show version information
    help         Show this help message

ENVIRONMENT:
    FLEETCHECK_INSTANCES      Number of instances (default: 20)
    FLEETCHECK_ROUNDS         Rounds per instance (default: 2)
    FLEETCHECK_BLOB_SIZE      Echo payload size in bytes
    FLEETCHECK_LOG_FORMAT     json or pretty
    RUST_LOG                  Log level (debug, info, warn, error)

EXIT CODES:
    0  Every instance passed every round
    1  At least one check failed
",
        env!("CARGO_PKG_VERSION")
    );
}
