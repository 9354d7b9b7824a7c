use crate::cycle::UpdateCycle;
use crate::poller::SensorSource;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Runs the update cycle, then waits one interval, until cancelled.
pub struct Scheduler<S> {
    cycle: UpdateCycle<S>,
    interval: Duration,
    cancel: CancellationToken,
}

impl<S: SensorSource> Scheduler<S> {
    pub fn new(cycle: UpdateCycle<S>, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            cycle,
            interval,
            cancel,
        }
    }

    pub async fn run(&self) {
        info!("Polling every {:?}", self.interval);

        while !self.cancel.is_cancelled() {
            match AssertUnwindSafe(self.cycle.run_once()).catch_unwind().await {
                Ok(updated) => info!("Updated {} measurements", updated),
                Err(panic) => error!("Error in service loop: {}", panic_message(&*panic)),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.interval) => {}
            }
        }

        info!("Polling stopped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
