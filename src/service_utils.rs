use std::env;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use uuid::Uuid;

/// Unique per process so two bridges never kick each other off the broker.
pub fn client_id() -> String {
    format!("owfs_mqtt_{}", Uuid::new_v4())
}

/// Installs the fmt subscriber at the level named by `LOG_LEVEL` (default `info`).
pub fn start_logging() {
    let level = log_level(env::var("LOG_LEVEL").ok().as_deref());
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn log_level(value: Option<&str>) -> Level {
    value
        .and_then(|v| v.trim().parse::<Level>().ok())
        .unwrap_or(Level::INFO)
}

/// Cancels `cancel` on Ctrl-C so in-flight work can unwind.
pub fn handle_shutdown(cancel: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to handle termination signal: {:?}", e);
            return;
        }

        info!("Shutting down");
        cancel.cancel();
    });
}
