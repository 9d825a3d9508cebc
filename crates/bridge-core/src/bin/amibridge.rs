//! AMI to AMQP bridge daemon.
//!
//! Relays every manager event onto the events topic, addressed by this
//! host's identity, and executes remote commands consumed from the commands
//! topic.

use std::process::ExitCode;

use tracing::{error, info};

use amibridge_bridge_core::logging::{self, LoggingConfig};
use amibridge_bridge_core::{Bridge, BridgeConfig, ShutdownCause};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("amibridge: {}", error);
            return ExitCode::from(1);
        }
    };

    let level = match logging::parse_log_level(&config.log_level) {
        Ok(level) => level,
        Err(error) => {
            eprintln!("amibridge: {}", error);
            return ExitCode::from(1);
        }
    };
    if let Err(error) = logging::setup_logging(&LoggingConfig::new(level, "amibridge")) {
        eprintln!("amibridge: {}", error);
        return ExitCode::from(1);
    }

    logging::log_welcome("amibridge", env!("CARGO_PKG_VERSION"));

    match Bridge::new(config).run().await {
        Ok(ShutdownCause::Signal) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Ok(ShutdownCause::TransportFatal) => {
            error!("Stopped after unrecoverable transport failure");
            ExitCode::from(2)
        }
        Err(error) => {
            error!(%error, "Bridge failed");
            ExitCode::from(2)
        }
    }
}
