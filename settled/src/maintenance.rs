//! Maintenance worker.
//!
//! Periodic housekeeping: purge expired idempotency rows and auto-void
//! payment authorizations that outlived their expiry.

use crate::services::PaymentService;
use settle_store::IdempotencyStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info};

/// Rows auto-voided per pass; the rest wait for the next tick.
const AUTO_VOID_BATCH: i64 = 50;

pub struct MaintenanceWorker {
    idempotency: Arc<dyn IdempotencyStore>,
    payments: Arc<PaymentService>,
    tick: Duration,
}

impl MaintenanceWorker {
    pub fn new(
        idempotency: Arc<dyn IdempotencyStore>,
        payments: Arc<PaymentService>,
        tick: Duration,
    ) -> Self {
        Self { idempotency, payments, tick }
    }

    pub async fn run(self, shutdown: tokio_util::sync::CancellationToken) {
        info!(tick_secs = self.tick.as_secs(), "Maintenance worker started");

        let mut ticker = interval(self.tick);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Maintenance worker shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }

        info!("Maintenance worker stopped");
    }

    async fn sweep(&self) {
        match self.idempotency.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "Purged expired idempotency keys"),
            Err(err) => error!(error = %err, "Idempotency purge failed"),
        }

        match self.payments.auto_void_expired(AUTO_VOID_BATCH).await {
            Ok(0) => {}
            Ok(voided) => info!(voided, "Auto-voided expired authorizations"),
            Err(err) => error!(error = %err, "Auto-void pass failed"),
        }
    }
}
