//! Calculator service.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ listener ──▶ instrumentation ──▶ timeout ──▶ handler ──▶ calculator binary
//!                              │    ▲                          │          (TRACE_ID, SPAN_ID,
//!                              │    └──── trace headers ◀──────┘           PARENT_SPAN_ID)
//!                              ▼
//!                    JSON logs (stdout)     metrics segments ──▶ /actuator/prometheus
//! ```
//!
//! Several worker processes may share one metrics directory; each owns its
//! own segment and every scrape merges all of them.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use calculator_service::config::resolve_config;
use calculator_service::lifecycle::{Service, Shutdown};
use calculator_service::observability::init_logging;

#[derive(Debug, Parser)]
#[command(name = "calculator-service", version, about = "HTTP façade for the calculator binary")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match resolve_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("calculator-service: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    if let Err(e) = init_logging(&config.observability) {
        eprintln!("calculator-service: {}", e);
        return ExitCode::FAILURE;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        calculator = %config.calculator.binary_path.display(),
        metrics_enabled = config.observability.metrics_enabled,
        tracing_enabled = config.observability.tracing_enabled,
        "calculator-service starting"
    );

    let service = match Service::prepare(config).await {
        Ok(service) => service,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    let metrics = service.metrics();
    if metrics.is_active() {
        if let Err(e) = metrics.install() {
            tracing::warn!(error = %e, "Metrics facade recorder not installed");
        }
    }

    let shutdown = Shutdown::new();
    let run = service.run(&shutdown);
    shutdown.trigger_on_signal();

    if let Err(e) = run.await {
        tracing::error!(error = %e, "Server terminated with error");
        return ExitCode::FAILURE;
    }

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
