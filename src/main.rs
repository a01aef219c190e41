use std::process::ExitCode;

use clap::{error::ErrorKind, Parser};

use dogfood_gateway::config::GatewayConfig;
use dogfood_gateway::lifecycle;
use dogfood_gateway::observability::logging::{self, LogFormat};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match GatewayConfig::try_parse() {
        Ok(config) => config,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            logging::init(LogFormat::Json);
            tracing::error!(error = %e.render(), "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    logging::init(config.observability.log_format);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dogfood-gateway starting");

    match lifecycle::run(config).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Gateway failed");
            ExitCode::FAILURE
        }
    }
}
