//! Periodic discover-and-reconcile driver

use chrono::Local;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::discovery::{group_by_health, PortScanner};
use crate::menu::{MenuReconciler, MenuSurface};

pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Refresh the menu every [`POLL_INTERVAL`] until the task is dropped.
pub async fn run<S: MenuSurface>(scanner: PortScanner, mut reconciler: MenuReconciler<S>) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        refresh(&scanner, &mut reconciler).await;
    }
}

/// One cycle. A failed scan leaves the menu exactly as it was.
pub async fn refresh<S: MenuSurface>(scanner: &PortScanner, reconciler: &mut MenuReconciler<S>) -> bool {
    match scanner.scan().await {
        Ok(listeners) => {
            let entries = group_by_health(listeners);
            reconciler.apply(&entries);
            debug!(
                "Menu refreshed at {}: {} entries, {} slots",
                Local::now().format("%H:%M:%S"),
                entries.len(),
                reconciler.slot_count()
            );
            true
        }
        Err(e) => {
            warn!("Error getting open ports: {}", e);
            false
        }
    }
}
