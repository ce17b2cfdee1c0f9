//! Background sweeps: expired carts and payments stuck in `processing`.

use std::time::Duration;

use serde::Serialize;
use tracing::instrument;

use super::{Deps, PaymentBridge};
use crate::error::Result;
use crate::gateway::GatewayOutcome;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_carts: u64,
    pub reconciled_payments: usize,
}

#[derive(Clone)]
pub struct Maintenance {
    deps: Deps,
    payments: PaymentBridge,
}

impl Maintenance {
    pub fn new(deps: Deps, payments: PaymentBridge) -> Self {
        Self { deps, payments }
    }

    #[instrument(name = "maintenance.purge_carts", skip_all)]
    pub async fn purge_expired_carts(&self) -> Result<u64> {
        let now = self.deps.clock.now();
        let mut tx = self.deps.store.begin().await?;
        let purged = tx.delete_expired_carts(now).await?;
        tx.commit().await?;
        if purged > 0 {
            tracing::info!(purged, "expired carts removed");
        }
        Ok(purged)
    }

    /// Asks the gateway for the authoritative state of every payment left in
    /// `processing` longer than `older_than`, and applies what it reports.
    /// Returns how many payments settled.
    #[instrument(name = "maintenance.reconcile_payments", skip_all)]
    pub async fn reconcile_stale_payments(&self, older_than: chrono::Duration) -> Result<usize> {
        let cutoff = self.deps.clock.now() - older_than;
        let stale = {
            let mut tx = self.deps.store.begin().await?;
            tx.stale_processing_payments(cutoff).await?
        };

        let mut settled = 0;
        for payment in stale {
            let outcome = match self.deps.gateways.retrieve(payment.method, &payment.intent_id).await {
                Ok(GatewayOutcome::Pending) => continue,
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::warn!(intent_id = %payment.intent_id, error = %err, "gateway lookup failed; will retry");
                    continue;
                }
            };
            match self.payments.reconcile(&payment.intent_id, outcome, None).await {
                Ok(snapshot) if snapshot.payment.status.is_settled() => settled += 1,
                Ok(_) => {}
                Err(err) => tracing::warn!(intent_id = %payment.intent_id, error = %err, "reconciliation failed"),
            }
        }
        Ok(settled)
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        let expired_carts = self.purge_expired_carts().await?;
        let reconciled_payments = self.reconcile_stale_payments(self.stale_after()).await?;
        Ok(SweepReport { expired_carts, reconciled_payments })
    }

    /// Runs [`Self::sweep`] every `interval` until the task is dropped.
    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(report) => tracing::debug!(?report, "maintenance sweep finished"),
                Err(err) => tracing::error!(error = %err, "maintenance sweep failed"),
            }
        }
    }

    /// Payments younger than twice the gateway timeout may still have a
    /// confirm call in flight.
    fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.deps.gateways.timeout() * 2).unwrap_or_else(|_| chrono::Duration::minutes(1))
    }
}
