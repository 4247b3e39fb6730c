//! Expiry Scanner Module
//!
//! Periodic task that moves overdue PENDING sessions to EXPIRED. Running it
//! more often only reduces detection latency; a missed tick is caught up by
//! the next one because `expire_due` always scans everything that is due.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::registry::{current_timestamp, SessionRegistry};

/// Periodic expiry sweep over the session registry.
pub struct ExpiryScanner {
    registry: Arc<SessionRegistry>,
    interval: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl ExpiryScanner {
    pub fn new(registry: Arc<SessionRegistry>, interval_secs: u64) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry,
            interval: Duration::from_secs(interval_secs),
            shutdown_tx,
        }
    }

    /// Spawns the scan loop and returns its handle.
    pub fn start(&self) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let interval = self.interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!("expiry scanner started, scanning every {:?}", interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let expired = registry.expire_due(current_timestamp()).await;
                        if expired > 0 {
                            debug!("expiry scan moved {} sessions to EXPIRED", expired);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Signals the scan loop to stop after the current sweep.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
