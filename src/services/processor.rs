//! Pin request processing pipeline
//!
//! Consumes one queued job per request and drives it to a terminal state:
//! inspect the content, price it, pin it locally, negotiate a storage
//! deal, and commit. Delivery is at-least-once, so every step tolerates
//! re-execution; the reload guard at the top and the conditional commit
//! at the bottom are what make redelivered and racing jobs lose cleanly.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clients::ContentStore;
use crate::db::schemas::PinStatus;
use crate::pricing::PricingService;
use crate::services::negotiate::DealBroker;
use crate::store::{DealStore, PinStore};
use crate::types::Result;

/// Failure reasons recorded on the request
const REASON_CONTENT_UNAVAILABLE: &str = "content unavailable";
const REASON_PIN_FAILED: &str = "pin failed";
const REASON_NEGOTIATION_FAILED: &str = "deal negotiation failed";

/// Attempts for the deal-row insert after a successful commit
const DEAL_INSERT_ATTEMPTS: u32 = 3;

/// What a pipeline run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Deal negotiated and request committed pinned
    Pinned,
    /// Request committed failed with the given reason
    Failed(String),
    /// Nothing to do: request missing, already terminal, or a competing
    /// write won the commit
    Noop,
}

/// The per-request asynchronous pipeline
pub struct PinProcessor {
    pins: Arc<dyn PinStore>,
    deals: Arc<dyn DealStore>,
    content: Arc<dyn ContentStore>,
    broker: DealBroker,
    pricing: PricingService,
    unpin_on_failure: bool,
}

impl PinProcessor {
    pub fn new(
        pins: Arc<dyn PinStore>,
        deals: Arc<dyn DealStore>,
        content: Arc<dyn ContentStore>,
        broker: DealBroker,
        pricing: PricingService,
        unpin_on_failure: bool,
    ) -> Self {
        Self {
            pins,
            deals,
            content,
            broker,
            pricing,
            unpin_on_failure,
        }
    }

    /// Run the pipeline for one request.
    ///
    /// Transient collaborator errors propagate as `Err` so the queue can
    /// redeliver with backoff; permanent failures are committed here and
    /// reported as `Ok(Failed)`.
    pub async fn process(&self, request_id: Uuid) -> Result<PipelineOutcome> {
        // Step 1: reload and guard. Anything but pending means the work
        // is already settled (processed, cancelled, or a racing
        // redelivery resolved it).
        let request = match self.pins.get(request_id).await? {
            Some(r) => r,
            None => {
                warn!(request_id = %request_id, "Pin job for unknown request, dropping");
                return Ok(PipelineOutcome::Noop);
            }
        };

        if request.status != PinStatus::Pending {
            info!(
                request_id = %request_id,
                status = %request.status,
                "Request already settled, nothing to do"
            );
            return Ok(PipelineOutcome::Noop);
        }

        // Step 2: inspect content size. Unresolvable content is terminal.
        let size_bytes = match self.content.stat_size(&request.cid).await {
            Ok(size) => size,
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                warn!(request_id = %request_id, cid = %request.cid, error = %e, "Content unavailable");
                return self.fail(request_id, REASON_CONTENT_UNAVAILABLE).await;
            }
        };

        // Step 3: price it
        let price_fil = self
            .pricing
            .calculate_price(size_bytes, request.duration_days);

        // Step 4: pin locally. Idempotent; already-pinned is success.
        if let Err(e) = self.content.pin(&request.cid).await {
            if e.is_transient() {
                return Err(e);
            }
            warn!(request_id = %request_id, cid = %request.cid, error = %e, "Pin refused");
            return self.fail(request_id, REASON_PIN_FAILED).await;
        }

        // Steps 5-6: select a provider and propose the deal
        let deal = match self.broker.negotiate(&request, price_fil).await {
            Ok(deal) => deal,
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Deal negotiation failed");
                let outcome = self.fail(request_id, REASON_NEGOTIATION_FAILED).await;
                if self.unpin_on_failure {
                    if let Err(e) = self.content.unpin(&request.cid).await {
                        warn!(cid = %request.cid, error = %e, "Best-effort unpin failed");
                    }
                }
                return outcome;
            }
        };

        // Step 7: conditional commit. Exactly one attempt can move the
        // request out of pending; only that attempt records a deal row.
        match self
            .pins
            .commit_pinned(request_id, size_bytes as i64, price_fil)
            .await?
        {
            Some(_) => {}
            None => {
                info!(request_id = %request_id, "Lost the commit race, discarding work");
                return Ok(PipelineOutcome::Noop);
            }
        }

        self.insert_deal_row(request_id, deal).await;

        info!(
            request_id = %request_id,
            size_bytes,
            price_fil = %price_fil,
            "Pin request completed"
        );
        Ok(PipelineOutcome::Pinned)
    }

    /// Commit a request as failed after the queue's retry budget for a
    /// transient error is spent.
    pub async fn fail_after_retries(&self, request_id: Uuid, cause: &str) -> Result<()> {
        let reason = format!("retries exhausted: {cause}");
        match self.pins.commit_failed(request_id, &reason).await? {
            Some(_) => {
                warn!(request_id = %request_id, cause, "Request failed after retry budget");
            }
            None => {
                info!(request_id = %request_id, "Retry-exhausted request already settled");
            }
        }
        Ok(())
    }

    async fn fail(&self, request_id: Uuid, reason: &str) -> Result<PipelineOutcome> {
        match self.pins.commit_failed(request_id, reason).await? {
            Some(_) => Ok(PipelineOutcome::Failed(reason.to_string())),
            // Someone else settled the request first
            None => Ok(PipelineOutcome::Noop),
        }
    }

    /// Persist the deal row after the commit won. Retried inline; a
    /// request pinned without its deal row is loud in the logs because
    /// nothing downstream can repair it.
    async fn insert_deal_row(&self, request_id: Uuid, deal: crate::db::schemas::StorageDealDoc) {
        for attempt in 1..=DEAL_INSERT_ATTEMPTS {
            match self.deals.create(deal.clone()).await {
                Ok(()) => return,
                Err(e) if attempt < DEAL_INSERT_ATTEMPTS => {
                    warn!(
                        request_id = %request_id,
                        attempt,
                        error = %e,
                        "Deal row insert failed, retrying"
                    );
                }
                Err(e) => {
                    error!(
                        request_id = %request_id,
                        deal_cid = %deal.deal_cid,
                        error = %e,
                        "Deal row insert failed permanently; request is pinned without a recorded deal"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock::{MockContentStore, MockLedger};
    use crate::db::schemas::{DealStatus, PinRequestDoc};
    use crate::store::{MemoryDealStore, MemoryPinStore};
    use std::str::FromStr;
    use std::sync::atomic::Ordering;

    const CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

    struct Fixture {
        pins: Arc<MemoryPinStore>,
        deals: Arc<MemoryDealStore>,
        content: Arc<MockContentStore>,
        ledger: Arc<MockLedger>,
        processor: PinProcessor,
    }

    fn fixture() -> Fixture {
        let pins = Arc::new(MemoryPinStore::new());
        let deals = Arc::new(MemoryDealStore::new());
        let content = Arc::new(MockContentStore::new().with_content(CID, 1 << 30));
        let ledger = Arc::new(MockLedger::new());

        let broker = DealBroker::new(ledger.clone(), "f3wallet".into(), 2880);
        let pricing = PricingService::new(
            Decimal::from_str("0.001").unwrap(),
            Decimal::from(20),
            1_048_576,
        );

        let processor = PinProcessor::new(
            pins.clone(),
            deals.clone(),
            content.clone(),
            broker,
            pricing,
            false,
        );

        Fixture {
            pins,
            deals,
            content,
            ledger,
            processor,
        }
    }

    async fn submit(f: &Fixture) -> Uuid {
        let req = PinRequestDoc::new(Uuid::new_v4(), CID.into(), 30);
        let id = req.id;
        f.pins.create(req).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_happy_path_commits_pinned_with_deal() {
        let f = fixture();
        let id = submit(&f).await;

        let outcome = f.processor.process(id).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Pinned);

        let request = f.pins.get(id).await.unwrap().unwrap();
        assert_eq!(request.status, PinStatus::Pinned);
        assert_eq!(request.size_bytes, 1 << 30);
        assert_eq!(request.price_fil, Decimal::from_str("0.0012").unwrap());

        let deals = f.deals.for_request(id).await.unwrap();
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].status, DealStatus::Pending);
        assert!(deals[0].end_epoch > deals[0].start_epoch);
        assert_eq!(deals[0].end_epoch - deals[0].start_epoch, 30 * 2880);

        assert_eq!(f.content.pins(), vec![CID.to_string()]);
    }

    #[tokio::test]
    async fn test_redelivery_is_noop() {
        let f = fixture();
        let id = submit(&f).await;

        assert_eq!(f.processor.process(id).await.unwrap(), PipelineOutcome::Pinned);
        // Same job delivered again
        assert_eq!(f.processor.process(id).await.unwrap(), PipelineOutcome::Noop);

        // Still exactly one deal
        assert_eq!(f.deals.for_request(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_content_fails_terminally() {
        let f = fixture();
        let req = PinRequestDoc::new(Uuid::new_v4(), "QmMissing000000000000000000000000000000000000".into(), 30);
        let id = req.id;
        f.pins.create(req).await.unwrap();

        let outcome = f.processor.process(id).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Failed("content unavailable".into()));

        let request = f.pins.get(id).await.unwrap().unwrap();
        assert_eq!(request.status, PinStatus::Failed);
        assert_eq!(request.failure_reason.as_deref(), Some("content unavailable"));
        assert!(f.deals.for_request(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pin_refusal_fails_terminally() {
        let f = fixture();
        let id = submit(&f).await;
        f.content.fail_pin.store(true, Ordering::Relaxed);

        let outcome = f.processor.process(id).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Failed("pin failed".into()));
    }

    #[tokio::test]
    async fn test_rejected_negotiation_fails_terminally() {
        let f = fixture();
        let id = submit(&f).await;
        f.ledger.fail_start_deal.store(true, Ordering::Relaxed);

        let outcome = f.processor.process(id).await.unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::Failed("deal negotiation failed".into())
        );
        assert!(f.deals.for_request(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_outage_propagates_for_retry() {
        let f = fixture();
        let id = submit(&f).await;
        f.content.unreachable.store(true, Ordering::Relaxed);

        let err = f.processor.process(id).await.unwrap_err();
        assert!(err.is_transient());

        // The request is untouched and the job can be redelivered
        let request = f.pins.get(id).await.unwrap().unwrap();
        assert_eq!(request.status, PinStatus::Pending);

        // Collaborator recovers, redelivery completes the request
        f.content.unreachable.store(false, Ordering::Relaxed);
        assert_eq!(f.processor.process(id).await.unwrap(), PipelineOutcome::Pinned);
    }

    #[tokio::test]
    async fn test_cancelled_request_is_not_processed() {
        let f = fixture();
        let req = PinRequestDoc::new(Uuid::new_v4(), CID.into(), 30);
        let id = req.id;
        let owner = req.owner_id;
        f.pins.create(req).await.unwrap();
        f.pins.cancel(id, owner).await.unwrap().unwrap();

        assert_eq!(f.processor.process(id).await.unwrap(), PipelineOutcome::Noop);
        assert!(f.ledger.started_deals().is_empty());
    }

    #[tokio::test]
    async fn test_fail_after_retries_only_touches_pending() {
        let f = fixture();
        let id = submit(&f).await;

        f.processor
            .fail_after_retries(id, "lotus unreachable")
            .await
            .unwrap();
        let request = f.pins.get(id).await.unwrap().unwrap();
        assert_eq!(request.status, PinStatus::Failed);

        // Calling again on the now-terminal request is a no-op
        f.processor
            .fail_after_retries(id, "lotus unreachable")
            .await
            .unwrap();
        assert_eq!(
            f.pins.get(id).await.unwrap().unwrap().status,
            PinStatus::Failed
        );
    }
}
