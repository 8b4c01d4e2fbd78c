//! Submission gateway
//!
//! The synchronous request-facing service: validates and persists pin
//! requests, enqueues the asynchronous pipeline, and answers queries and
//! cancellation. Returning immediately after enqueue decouples request
//! latency from negotiation latency, which may take minutes.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clients::{validate_cid, DealLedger, ProviderInfo};
use crate::db::schemas::{PinRequestDoc, PinStatus, StorageDealDoc};
use crate::jobs::{Job, JobSink};
use crate::pricing::PricingService;
use crate::store::{DealStore, PinStore};
use crate::types::{HoldfastError, Result};

/// Duration bounds in days (1 day to 3 years)
pub const MIN_DURATION_DAYS: i64 = 1;
pub const MAX_DURATION_DAYS: i64 = 1095;

/// List pagination bounds
pub const MAX_PAGE_LIMIT: u64 = 100;
pub const DEFAULT_PAGE_LIMIT: u64 = 20;

/// Request and deal counts plus wallet state, for the stats endpoint
#[derive(Debug, Serialize)]
pub struct ServiceStats {
    pub requests: BTreeMap<&'static str, u64>,
    pub deals: BTreeMap<&'static str, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_balance_fil: Option<f64>,
}

/// The request-facing service
pub struct PinGateway {
    pins: Arc<dyn PinStore>,
    deals: Arc<dyn DealStore>,
    queue: Arc<dyn JobSink>,
    ledger: Arc<dyn DealLedger>,
    pricing: PricingService,
    wallet_address: String,
}

impl PinGateway {
    pub fn new(
        pins: Arc<dyn PinStore>,
        deals: Arc<dyn DealStore>,
        queue: Arc<dyn JobSink>,
        ledger: Arc<dyn DealLedger>,
        pricing: PricingService,
        wallet_address: String,
    ) -> Self {
        Self {
            pins,
            deals,
            queue,
            ledger,
            pricing,
            wallet_address,
        }
    }

    /// Validate and persist a new request, enqueue its processing job,
    /// and return the request id.
    pub async fn submit(&self, owner_id: Uuid, cid: &str, duration_days: i64) -> Result<Uuid> {
        validate_cid(cid)?;

        if !(MIN_DURATION_DAYS..=MAX_DURATION_DAYS).contains(&duration_days) {
            return Err(HoldfastError::Validation(format!(
                "duration must be between {MIN_DURATION_DAYS} and {MAX_DURATION_DAYS} days"
            )));
        }

        let request = PinRequestDoc::new(owner_id, cid.to_string(), duration_days);
        let request_id = request.id;

        self.pins.create(request).await?;
        self.queue
            .enqueue(&Job::ProcessPin { request_id })
            .await
            .map_err(|e| {
                // The pending row survives; the worker's stale-pending
                // sweep will pick it up once the queue is back.
                warn!(request_id = %request_id, error = %e, "Failed to enqueue pin job");
                e
            })?;

        info!(request_id = %request_id, cid = %cid, duration_days, "Pin request accepted");
        Ok(request_id)
    }

    /// Fetch one request scoped to its owner
    pub async fn get(&self, id: Uuid, owner_id: Uuid) -> Result<PinRequestDoc> {
        self.pins
            .get_owned(id, owner_id)
            .await?
            .ok_or_else(|| HoldfastError::NotFound("pin request not found".into()))
    }

    /// One page of the owner's requests, newest first
    pub async fn list(
        &self,
        owner_id: Uuid,
        page: u64,
        limit: u64,
        status: Option<&str>,
    ) -> Result<(Vec<PinRequestDoc>, u64)> {
        if page < 1 {
            return Err(HoldfastError::Validation("page must be at least 1".into()));
        }
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(HoldfastError::Validation(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }

        let status = match status {
            Some(raw) => Some(PinStatus::parse(raw).ok_or_else(|| {
                HoldfastError::Validation(format!("unknown status filter: {raw}"))
            })?),
            None => None,
        };

        self.pins.list_by_owner(owner_id, page, limit, status).await
    }

    /// Cancel a pending request. Only the owner can cancel, and a foreign
    /// request is reported as missing rather than forbidden.
    pub async fn cancel(&self, id: Uuid, owner_id: Uuid) -> Result<()> {
        if self.pins.cancel(id, owner_id).await?.is_some() {
            info!(request_id = %id, "Pin request cancelled");
            return Ok(());
        }

        // The conditional write matched nothing: distinguish a missing
        // (or foreign) request from one that is past pending.
        match self.pins.get_owned(id, owner_id).await? {
            None => Err(HoldfastError::NotFound("pin request not found".into())),
            Some(request) => Err(HoldfastError::InvalidState(format!(
                "cannot cancel a {} request",
                request.status
            ))),
        }
    }

    /// All deals across the owner's requests for a content identifier
    pub async fn deals_for_cid(&self, cid: &str, owner_id: Uuid) -> Result<Vec<StorageDealDoc>> {
        let requests = self.owned_requests_for_cid(cid, owner_id).await?;

        let mut all_deals = Vec::new();
        for request in &requests {
            all_deals.extend(self.deals.for_request(request.id).await?);
        }
        Ok(all_deals)
    }

    /// The owner's pinned requests for a CID, for explicit renewal.
    /// NotFound when the owner has no requests for this content.
    pub async fn renewable_requests(
        &self,
        cid: &str,
        owner_id: Uuid,
    ) -> Result<Vec<PinRequestDoc>> {
        let requests = self.owned_requests_for_cid(cid, owner_id).await?;
        Ok(requests
            .into_iter()
            .filter(|r| r.status == PinStatus::Pinned)
            .collect())
    }

    async fn owned_requests_for_cid(
        &self,
        cid: &str,
        owner_id: Uuid,
    ) -> Result<Vec<PinRequestDoc>> {
        validate_cid(cid)?;

        let requests: Vec<PinRequestDoc> = self
            .pins
            .find_by_cid(cid)
            .await?
            .into_iter()
            .filter(|r| r.owner_id == owner_id)
            .collect();

        if requests.is_empty() {
            return Err(HoldfastError::NotFound("no pin requests for this CID".into()));
        }
        Ok(requests)
    }

    /// Price quote for arbitrary size and duration
    pub fn quote(&self, size_bytes: u64, duration_days: i64) -> rust_decimal::Decimal {
        self.pricing.calculate_price(size_bytes, duration_days)
    }

    /// Current pricing configuration
    pub fn pricing_info(&self) -> crate::pricing::PricingInfo {
        self.pricing.pricing_info()
    }

    /// Providers currently accepting deals
    pub async fn providers(&self) -> Result<Vec<ProviderInfo>> {
        self.ledger.available_providers().await
    }

    /// Request/deal counts by status plus the deal wallet balance.
    /// A ledger outage degrades the balance to absent rather than
    /// failing the endpoint.
    pub async fn service_stats(&self) -> Result<ServiceStats> {
        let requests = self
            .pins
            .counts_by_status()
            .await?
            .into_iter()
            .map(|(status, count)| (status.as_str(), count))
            .collect();

        let deals = self
            .deals
            .counts_by_status()
            .await?
            .into_iter()
            .map(|(status, count)| (status.as_str(), count))
            .collect();

        let wallet_balance_fil = match self.ledger.wallet_balance(&self.wallet_address).await {
            Ok(balance) => Some(balance),
            Err(e) => {
                warn!(error = %e, "Wallet balance unavailable for stats");
                None
            }
        };

        Ok(ServiceStats {
            requests,
            deals,
            wallet_balance_fil,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock::MockLedger;
    use crate::jobs::MemoryJobSink;
    use crate::store::{MemoryDealStore, MemoryPinStore};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

    struct Fixture {
        pins: Arc<MemoryPinStore>,
        sink: Arc<MemoryJobSink>,
        gateway: PinGateway,
    }

    fn fixture() -> Fixture {
        let pins = Arc::new(MemoryPinStore::new());
        let deals = Arc::new(MemoryDealStore::new());
        let sink = Arc::new(MemoryJobSink::new());
        let ledger = Arc::new(MockLedger::new());

        let gateway = PinGateway::new(
            pins.clone(),
            deals,
            sink.clone(),
            ledger,
            PricingService::new(
                Decimal::from_str("0.001").unwrap(),
                Decimal::from(20),
                1_048_576,
            ),
            "f3wallet".into(),
        );

        Fixture { pins, sink, gateway }
    }

    #[tokio::test]
    async fn test_submit_persists_and_enqueues() {
        let f = fixture();
        let owner = Uuid::new_v4();

        let id = f.gateway.submit(owner, CID, 30).await.unwrap();

        let stored = f.pins.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, PinStatus::Pending);
        assert_eq!(stored.size_bytes, 0);
        assert_eq!(stored.price_fil, Decimal::ZERO);

        assert_eq!(f.sink.jobs(), vec![Job::ProcessPin { request_id: id }]);
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_input() {
        let f = fixture();
        let owner = Uuid::new_v4();

        assert!(matches!(
            f.gateway.submit(owner, "not-a-cid", 30).await,
            Err(HoldfastError::Validation(_))
        ));
        assert!(matches!(
            f.gateway.submit(owner, CID, 0).await,
            Err(HoldfastError::Validation(_))
        ));
        assert!(matches!(
            f.gateway.submit(owner, CID, 1096).await,
            Err(HoldfastError::Validation(_))
        ));
        assert!(f.sink.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_semantics() {
        let f = fixture();
        let owner = Uuid::new_v4();
        let id = f.gateway.submit(owner, CID, 30).await.unwrap();

        // A stranger sees NotFound, not a permission error
        assert!(matches!(
            f.gateway.cancel(id, Uuid::new_v4()).await,
            Err(HoldfastError::NotFound(_))
        ));

        // The owner cancels the pending request
        f.gateway.cancel(id, owner).await.unwrap();
        assert_eq!(
            f.pins.get(id).await.unwrap().unwrap().status,
            PinStatus::Cancelled
        );

        // A second cancel is rejected as an invalid state
        assert!(matches!(
            f.gateway.cancel(id, owner).await,
            Err(HoldfastError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_pinned_rejected() {
        let f = fixture();
        let owner = Uuid::new_v4();
        let id = f.gateway.submit(owner, CID, 30).await.unwrap();
        f.pins
            .commit_pinned(id, 1024, Decimal::ONE)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(
            f.gateway.cancel(id, owner).await,
            Err(HoldfastError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_list_pagination_and_filter() {
        let f = fixture();
        let owner = Uuid::new_v4();
        for _ in 0..45 {
            f.gateway.submit(owner, CID, 30).await.unwrap();
        }

        let (items, total) = f.gateway.list(owner, 2, 20, None).await.unwrap();
        assert_eq!(items.len(), 20);
        assert_eq!(total, 45);

        let (items, total) = f
            .gateway
            .list(owner, 1, 20, Some("pending"))
            .await
            .unwrap();
        assert_eq!(items.len(), 20);
        assert_eq!(total, 45);

        let (items, total) = f.gateway.list(owner, 1, 20, Some("failed")).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 0);

        assert!(f.gateway.list(owner, 0, 20, None).await.is_err());
        assert!(f.gateway.list(owner, 1, 0, None).await.is_err());
        assert!(f.gateway.list(owner, 1, 101, None).await.is_err());
        assert!(f.gateway.list(owner, 1, 20, Some("bogus")).await.is_err());
    }

    #[tokio::test]
    async fn test_get_is_owner_scoped() {
        let f = fixture();
        let owner = Uuid::new_v4();
        let id = f.gateway.submit(owner, CID, 30).await.unwrap();

        assert!(f.gateway.get(id, owner).await.is_ok());
        assert!(matches!(
            f.gateway.get(id, Uuid::new_v4()).await,
            Err(HoldfastError::NotFound(_))
        ));
    }
}
