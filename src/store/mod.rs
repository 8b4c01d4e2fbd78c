//! Repository traits over persisted state
//!
//! The pipeline and the periodic managers talk to persistence through
//! these traits. They carry exactly the query shapes the service needs:
//! by id, by owner with pagination and status filter, by CID, open deals,
//! expiring deals, bounded pending scans, and the conditional status
//! transitions that make redelivered jobs lose cleanly.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use bson::DateTime;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::CleanupAction;
use crate::db::schemas::{DealStatus, PinRequestDoc, PinStatus, StorageDealDoc};
use crate::types::Result;

pub use memory::{MemoryDealStore, MemoryPinStore};
pub use mongo::{MongoDealStore, MongoPinStore};

/// Pin request persistence
#[async_trait]
pub trait PinStore: Send + Sync {
    /// Persist a new pending request
    async fn create(&self, request: PinRequestDoc) -> Result<()>;

    /// Fetch by id regardless of owner (pipeline side)
    async fn get(&self, id: Uuid) -> Result<Option<PinRequestDoc>>;

    /// Fetch by id scoped to an owner (gateway side). A foreign request
    /// is indistinguishable from a missing one.
    async fn get_owned(&self, id: Uuid, owner_id: Uuid) -> Result<Option<PinRequestDoc>>;

    /// One page of an owner's requests, newest first, plus the total
    /// matching count (independent of page and limit).
    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        page: u64,
        limit: u64,
        status: Option<PinStatus>,
    ) -> Result<(Vec<PinRequestDoc>, u64)>;

    /// All requests for a content identifier
    async fn find_by_cid(&self, cid: &str) -> Result<Vec<PinRequestDoc>>;

    /// Pending requests, oldest first, bounded
    async fn pending(&self, limit: i64) -> Result<Vec<PinRequestDoc>>;

    /// Conditionally commit `pending -> pinned` with the inspected size
    /// and computed price. Returns the updated document, or None when the
    /// request is no longer pending (benign: a competing write won).
    async fn commit_pinned(
        &self,
        id: Uuid,
        size_bytes: i64,
        price_fil: Decimal,
    ) -> Result<Option<PinRequestDoc>>;

    /// Conditionally commit `pending -> failed` with a recorded cause.
    async fn commit_failed(&self, id: Uuid, reason: &str) -> Result<Option<PinRequestDoc>>;

    /// Conditionally commit `pending -> cancelled`, scoped to the owner.
    async fn cancel(&self, id: Uuid, owner_id: Uuid) -> Result<Option<PinRequestDoc>>;

    /// Request counts per status, for the stats endpoint
    async fn counts_by_status(&self) -> Result<Vec<(PinStatus, u64)>>;

    /// Apply the retention action to failed requests last touched before
    /// the cutoff. Returns how many rows were affected. Pending and
    /// pinned rows are never matched.
    async fn sweep_failed(&self, cutoff: DateTime, action: CleanupAction) -> Result<u64>;
}

/// Storage deal persistence
#[async_trait]
pub trait DealStore: Send + Sync {
    /// Persist a new deal row
    async fn create(&self, deal: StorageDealDoc) -> Result<()>;

    /// All deals belonging to a request
    async fn for_request(&self, pin_request_id: Uuid) -> Result<Vec<StorageDealDoc>>;

    /// Deals the monitor still has to reconcile (pending, published, active)
    async fn open_deals(&self) -> Result<Vec<StorageDealDoc>>;

    /// Active deals whose end epoch is at or below the threshold
    async fn expiring(&self, epoch_threshold: i64) -> Result<Vec<StorageDealDoc>>;

    /// Conditionally advance a deal's status. The transition is validated
    /// against the central table; the write filters on the expected
    /// current status so stale observations lose. Returns whether the
    /// write was applied.
    async fn update_status(&self, id: Uuid, from: DealStatus, to: DealStatus) -> Result<bool>;

    /// Deal counts per status, for the stats endpoint
    async fn counts_by_status(&self) -> Result<Vec<(DealStatus, u64)>>;
}

/// All pin statuses, for stats iteration
pub(crate) const ALL_PIN_STATUSES: [PinStatus; 4] = [
    PinStatus::Pending,
    PinStatus::Pinned,
    PinStatus::Failed,
    PinStatus::Cancelled,
];

/// All deal statuses, for stats iteration
pub(crate) const ALL_DEAL_STATUSES: [DealStatus; 7] = [
    DealStatus::Pending,
    DealStatus::Published,
    DealStatus::Active,
    DealStatus::Expired,
    DealStatus::Slashed,
    DealStatus::Failed,
    DealStatus::Cancelled,
];
