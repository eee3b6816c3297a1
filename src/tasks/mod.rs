//! Background scheduled tasks for the application.
//!
//! Call `spawn_all` once during startup. Tasks are detached with
//! `tokio::spawn` and never block the caller.

use crate::services::ReconciliationService;
use chrono::Utc;
use std::time::Duration;

/// Spawn all background tasks.
pub fn spawn_all(reconciliation: ReconciliationService, sweep_interval_secs: u64) {
    // Stale PENDING orders whose webhook never arrived, and paid orders
    // whose grant was lost
    {
        let svc = reconciliation.clone();
        let interval = Duration::from_secs(sweep_interval_secs.max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match svc.sweep_pending_orders(Utc::now()).await {
                    Ok(s) if s.examined > 0 => log::info!(
                        "Reconciliation sweep: examined={} succeeded={} failed={} unchanged={} regranted={} errors={}",
                        s.examined,
                        s.succeeded,
                        s.failed,
                        s.unchanged,
                        s.regranted,
                        s.errors
                    ),
                    Ok(_) => log::debug!("Reconciliation sweep found no stale orders"),
                    Err(e) => log::error!("Reconciliation sweep failed: {e:?}"),
                }
            }
        });
    }
}
