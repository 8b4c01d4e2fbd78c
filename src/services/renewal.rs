//! Renewal manager
//!
//! Finds active deals close to expiry and negotiates successor deals on
//! the same request, using the request's original content identifier and
//! duration. The expiring deal itself is left untouched; the deal monitor
//! will move it to expired when the chain does.

use std::sync::Arc;
use tracing::{info, warn};

use crate::db::schemas::{PinRequestDoc, StorageDealDoc};
use crate::pricing::PricingService;
use crate::services::negotiate::DealBroker;
use crate::store::{DealStore, PinStore};
use crate::types::{HoldfastError, Result};

/// What one renewal pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RenewalSummary {
    pub candidates: usize,
    pub renewed: usize,
    pub skipped: usize,
}

/// Detects soon-to-expire deals and opens successors
pub struct RenewalManager {
    pins: Arc<dyn PinStore>,
    deals: Arc<dyn DealStore>,
    broker: DealBroker,
    pricing: PricingService,
    threshold_epochs: i64,
}

impl RenewalManager {
    pub fn new(
        pins: Arc<dyn PinStore>,
        deals: Arc<dyn DealStore>,
        broker: DealBroker,
        pricing: PricingService,
        threshold_epochs: i64,
    ) -> Self {
        Self {
            pins,
            deals,
            broker,
            pricing,
            threshold_epochs,
        }
    }

    /// One renewal pass. The current epoch is fetched once; per-deal
    /// failures are logged and skipped so one bad negotiation does not
    /// starve the rest.
    pub async fn run_pass(&self) -> Result<RenewalSummary> {
        let current_epoch = self.broker.ledger().current_epoch().await?;
        let candidates = self
            .deals
            .expiring(current_epoch + self.threshold_epochs)
            .await?;

        let mut summary = RenewalSummary {
            candidates: candidates.len(),
            ..Default::default()
        };

        for deal in &candidates {
            match self.renew_deal(deal).await {
                Ok(Some(successor)) => {
                    info!(
                        expiring_deal = %deal.id,
                        successor_deal = %successor.id,
                        request_id = %deal.pin_request_id,
                        end_epoch = successor.end_epoch,
                        "Deal renewed"
                    );
                    summary.renewed += 1;
                }
                Ok(None) => {
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!(
                        deal_id = %deal.id,
                        request_id = %deal.pin_request_id,
                        error = %e,
                        "Deal renewal failed, skipping"
                    );
                    summary.skipped += 1;
                }
            }
        }

        info!(
            candidates = summary.candidates,
            renewed = summary.renewed,
            skipped = summary.skipped,
            "Renewal pass complete"
        );
        Ok(summary)
    }

    /// Renew one expiring deal if it does not already have a live
    /// successor. The successor guard is what makes a pass idempotent:
    /// duplicated or concurrent passes see the first successor and skip.
    async fn renew_deal(&self, deal: &StorageDealDoc) -> Result<Option<StorageDealDoc>> {
        let siblings = self.deals.for_request(deal.pin_request_id).await?;
        let has_live_successor = siblings
            .iter()
            .any(|d| d.id != deal.id && d.status.is_open() && d.end_epoch > deal.end_epoch);

        if has_live_successor {
            return Ok(None);
        }

        let request = match self.pins.get(deal.pin_request_id).await? {
            Some(r) => r,
            None => {
                warn!(
                    deal_id = %deal.id,
                    request_id = %deal.pin_request_id,
                    "Expiring deal has no parent request"
                );
                return Ok(None);
            }
        };

        let successor = self.negotiate_successor(&request).await?;
        Ok(Some(successor))
    }

    /// Negotiate and persist a successor deal for a request. Also used by
    /// the gateway's explicit renew-by-CID operation.
    pub async fn negotiate_successor(&self, request: &PinRequestDoc) -> Result<StorageDealDoc> {
        if request.size_bytes <= 0 {
            return Err(HoldfastError::InvalidState(format!(
                "request {} has no recorded size",
                request.id
            )));
        }

        let price = self
            .pricing
            .calculate_price(request.size_bytes as u64, request.duration_days);

        let successor = self.broker.negotiate(request, price).await?;
        self.deals.create(successor.clone()).await?;
        Ok(successor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock::MockLedger;
    use crate::db::schemas::{DealStatus, PinStatus};
    use crate::store::{MemoryDealStore, MemoryPinStore};
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    const CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

    struct Fixture {
        pins: Arc<MemoryPinStore>,
        deals: Arc<MemoryDealStore>,
        ledger: Arc<MockLedger>,
        manager: RenewalManager,
    }

    fn fixture(threshold: i64) -> Fixture {
        let pins = Arc::new(MemoryPinStore::new());
        let deals = Arc::new(MemoryDealStore::new());
        let ledger = Arc::new(MockLedger::new());

        let manager = RenewalManager::new(
            pins.clone(),
            deals.clone(),
            DealBroker::new(ledger.clone(), "f3wallet".into(), 2880),
            PricingService::new(
                Decimal::from_str("0.001").unwrap(),
                Decimal::from(20),
                1_048_576,
            ),
            threshold,
        );

        Fixture {
            pins,
            deals,
            ledger,
            manager,
        }
    }

    /// A pinned request with one active deal ending at the given epoch
    async fn pinned_with_deal(f: &Fixture, end_epoch: i64) -> (Uuid, Uuid) {
        let mut request = PinRequestDoc::new(Uuid::new_v4(), CID.into(), 30);
        request.status = PinStatus::Pinned;
        request.size_bytes = 1 << 30;
        let request_id = request.id;
        f.pins.create(request).await.unwrap();

        let mut deal = StorageDealDoc::new(
            request_id,
            format!("bafydeal{}", Uuid::new_v4().simple()),
            "f01000".into(),
            1000,
            end_epoch,
            0.5,
        );
        deal.status = DealStatus::Active;
        let deal_id = deal.id;
        f.deals.create(deal).await.unwrap();

        (request_id, deal_id)
    }

    #[tokio::test]
    async fn test_expiring_deal_gets_exactly_one_successor() {
        let f = fixture(20_160);
        // Epoch is 100_000 in the mock; this deal is inside the window
        let (request_id, _) = pinned_with_deal(&f, 110_000).await;

        let summary = f.manager.run_pass().await.unwrap();
        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.renewed, 1);

        let deals = f.deals.for_request(request_id).await.unwrap();
        assert_eq!(deals.len(), 2);

        // A second pass sees the live successor and does nothing
        let summary = f.manager.run_pass().await.unwrap();
        assert_eq!(summary.renewed, 0);
        assert_eq!(summary.skipped, summary.candidates);
        assert_eq!(f.deals.for_request(request_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_healthy_deal_not_selected() {
        let f = fixture(20_160);
        // Ends far beyond epoch + threshold
        pinned_with_deal(&f, 500_000).await;

        let summary = f.manager.run_pass().await.unwrap();
        assert_eq!(summary.candidates, 0);
        assert_eq!(summary.renewed, 0);
    }

    #[tokio::test]
    async fn test_successor_covers_from_current_epoch() {
        let f = fixture(20_160);
        let (request_id, old_deal) = pinned_with_deal(&f, 105_000).await;

        f.manager.run_pass().await.unwrap();

        let deals = f.deals.for_request(request_id).await.unwrap();
        let successor = deals.iter().find(|d| d.id != old_deal).unwrap();
        assert_eq!(successor.start_epoch, 100_000);
        assert_eq!(successor.end_epoch, 100_000 + 30 * 2880);
        assert_eq!(successor.status, DealStatus::Pending);

        // The expiring deal itself is untouched
        let old = deals.iter().find(|d| d.id == old_deal).unwrap();
        assert_eq!(old.status, DealStatus::Active);
        assert_eq!(old.end_epoch, 105_000);
    }

    #[tokio::test]
    async fn test_failed_negotiation_skips_and_pass_continues() {
        let f = fixture(20_160);
        let (a, _) = pinned_with_deal(&f, 104_000).await;
        let (b, _) = pinned_with_deal(&f, 106_000).await;
        f.ledger.fail_start_deal.store(true, Ordering::Relaxed);

        let summary = f.manager.run_pass().await.unwrap();
        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.renewed, 0);
        assert_eq!(summary.skipped, 2);

        assert_eq!(f.deals.for_request(a).await.unwrap().len(), 1);
        assert_eq!(f.deals.for_request(b).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_outage_aborts_pass_for_retry() {
        let f = fixture(20_160);
        pinned_with_deal(&f, 104_000).await;
        f.ledger.unreachable.store(true, Ordering::Relaxed);

        let err = f.manager.run_pass().await.unwrap_err();
        assert!(err.is_transient());
    }
}
