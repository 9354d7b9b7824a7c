mod config;
mod cycle;
mod models;
mod mqtt_service;
mod parser;
mod poller;
mod publisher;
mod scheduler;
mod service;
mod service_utils;
#[cfg(test)]
mod test_support;

use crate::config::Config;
use crate::service::Service;
use crate::service_utils::{handle_shutdown, start_logging};
use dotenvy::dotenv;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    start_logging();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Polling {} device entries from {}",
        config.devices.len(),
        config.ow_http_host
    );

    let cancel = CancellationToken::new();
    handle_shutdown(cancel.clone());

    match Service::new(config, cancel).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Service stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}
