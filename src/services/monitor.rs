//! Deal monitor
//!
//! Periodic reconciliation of local deal state against the ledger. Each
//! open deal is checked independently; one unreachable provider or RPC
//! hiccup never blocks the rest of the pass.

use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clients::DealLedger;
use crate::db::schemas::{map_ledger_state, StorageDealDoc};
use crate::store::DealStore;
use crate::types::Result;

/// What one monitor pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MonitorSummary {
    pub checked: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Reconciles deal status with the external ledger
pub struct DealMonitor {
    deals: Arc<dyn DealStore>,
    ledger: Arc<dyn DealLedger>,
    concurrency: usize,
}

impl DealMonitor {
    pub fn new(deals: Arc<dyn DealStore>, ledger: Arc<dyn DealLedger>, concurrency: usize) -> Self {
        Self {
            deals,
            ledger,
            concurrency: concurrency.max(1),
        }
    }

    /// Check every open deal once. Per-deal failures are logged and
    /// skipped; the pass itself only fails if the selection query does.
    pub async fn run_pass(&self) -> Result<MonitorSummary> {
        let open = self.deals.open_deals().await?;
        let checked = open.len();

        let updated = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);

        stream::iter(open)
            .for_each_concurrent(self.concurrency, |deal| {
                let updated = &updated;
                let skipped = &skipped;
                async move {
                    match self.check_deal(&deal).await {
                        Ok(true) => {
                            updated.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!(
                                deal_id = %deal.id,
                                deal_cid = %deal.deal_cid,
                                provider = %deal.provider_id,
                                error = %e,
                                "Deal status check failed, skipping"
                            );
                            skipped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
            .await;

        let summary = MonitorSummary {
            checked,
            updated: updated.into_inner(),
            skipped: skipped.into_inner(),
        };

        info!(
            checked = summary.checked,
            updated = summary.updated,
            skipped = summary.skipped,
            "Deal monitor pass complete"
        );
        Ok(summary)
    }

    /// Query the ledger for one deal and apply the mapped status if it
    /// changed. Returns whether a write was applied.
    async fn check_deal(&self, deal: &StorageDealDoc) -> Result<bool> {
        let state = self.ledger.deal_status(&deal.deal_cid).await?;

        let mapped = match map_ledger_state(&state) {
            Some(status) => status,
            None => {
                warn!(deal_cid = %deal.deal_cid, state = %state, "Unrecognized ledger deal state");
                return Ok(false);
            }
        };

        if mapped == deal.status {
            return Ok(false);
        }

        if !deal.status.can_transition(mapped) {
            // Stale or out-of-order observation; the ledger will be
            // consulted again next pass.
            debug!(
                deal_id = %deal.id,
                from = %deal.status,
                to = %mapped,
                "Ignoring backward deal transition"
            );
            return Ok(false);
        }

        let applied = self.deals.update_status(deal.id, deal.status, mapped).await?;
        if applied {
            info!(
                deal_id = %deal.id,
                deal_cid = %deal.deal_cid,
                from = %deal.status,
                to = %mapped,
                "Deal status updated"
            );
        }
        Ok(applied)
    }
}
