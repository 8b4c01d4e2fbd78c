//! Storage deal document schema
//!
//! One deal row per negotiated contract with a storage provider. A request
//! accumulates deal rows over time through renewal; each row covers one
//! continuous epoch range. Deal status is advanced only by the deal
//! monitor, apart from the initial Pending write and an immediate Failed
//! write on negotiation failure.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for storage deals
pub const DEAL_COLLECTION: &str = "storage_deals";

/// Storage deal lifecycle status
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    Pending,
    Published,
    Active,
    Expired,
    Slashed,
    Failed,
    Cancelled,
}

impl DealStatus {
    /// Statuses the deal monitor still has to reconcile
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Published | Self::Active)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    /// Central transition table for monitor-driven movements. Forward
    /// only; a deal never leaves a terminal state.
    pub fn can_transition(&self, to: DealStatus) -> bool {
        match (self, to) {
            (Self::Pending, Self::Published)
            | (Self::Pending, Self::Active)
            | (Self::Pending, Self::Failed)
            | (Self::Pending, Self::Cancelled)
            | (Self::Published, Self::Active)
            | (Self::Published, Self::Failed)
            | (Self::Published, Self::Cancelled)
            | (Self::Active, Self::Expired)
            | (Self::Active, Self::Slashed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Published => "published",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Slashed => "slashed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for DealStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an on-chain deal state string into the internal taxonomy.
///
/// Lotus reports states like `StorageDealActive` or `StorageDealSealing`;
/// anything we do not recognize maps to None and leaves the stored status
/// untouched.
pub fn map_ledger_state(state: &str) -> Option<DealStatus> {
    match state {
        "StorageDealActive" => Some(DealStatus::Active),
        "StorageDealPublish"
        | "StorageDealPublishing"
        | "StorageDealStaged"
        | "StorageDealSealing"
        | "StorageDealAwaitingPreCommit" => Some(DealStatus::Published),
        "StorageDealProposalAccepted" | "StorageDealWaitingForData" | "StorageDealTransferring" => {
            Some(DealStatus::Pending)
        }
        "StorageDealExpired" => Some(DealStatus::Expired),
        "StorageDealSlashed" => Some(DealStatus::Slashed),
        "StorageDealProposalRejected" | "StorageDealError" | "StorageDealFailing" => {
            Some(DealStatus::Failed)
        }
        "StorageDealProposalNotFound" => Some(DealStatus::Cancelled),
        _ => None,
    }
}

/// Storage deal document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StorageDealDoc {
    /// Deal identity
    #[serde(rename = "_id")]
    pub id: Uuid,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning pin request
    pub pin_request_id: Uuid,

    /// External deal handle returned by the ledger
    pub deal_cid: String,

    /// Storage provider identity
    pub provider_id: String,

    /// First covered epoch
    pub start_epoch: i64,

    /// Last covered epoch; always greater than start_epoch
    pub end_epoch: i64,

    /// Lifecycle status
    pub status: DealStatus,

    /// Total storage price in FIL
    #[serde(default)]
    pub storage_price_fil: f64,

    /// Estimated retrieval cost in FIL
    #[serde(default)]
    pub retrieval_cost_fil: f64,
}

impl StorageDealDoc {
    /// Create a new pending deal row
    pub fn new(
        pin_request_id: Uuid,
        deal_cid: String,
        provider_id: String,
        start_epoch: i64,
        end_epoch: i64,
        storage_price_fil: f64,
    ) -> Self {
        debug_assert!(end_epoch > start_epoch);
        Self {
            id: Uuid::new_v4(),
            metadata: Metadata::new(),
            pin_request_id,
            deal_cid,
            provider_id,
            start_epoch,
            end_epoch,
            status: DealStatus::Pending,
            storage_price_fil,
            retrieval_cost_fil: 0.0,
        }
    }

    /// Whether this deal is close enough to expiry to renew
    pub fn needs_renewal(&self, current_epoch: i64, threshold_epochs: i64) -> bool {
        self.status == DealStatus::Active && (self.end_epoch - current_epoch) <= threshold_epochs
    }
}

impl IntoIndexes for StorageDealDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Deals for a request
            (
                doc! { "pin_request_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("pin_request_index".to_string())
                        .build(),
                ),
            ),
            // External handle lookups
            (
                doc! { "deal_cid": 1 },
                Some(
                    IndexOptions::builder()
                        .name("deal_cid_index".to_string())
                        .build(),
                ),
            ),
            // Monitor scans and expiry selection
            (
                doc! { "status": 1, "end_epoch": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_end_epoch_index".to_string())
                        .build(),
                ),
            ),
            // Provider-scoped queries
            (
                doc! { "provider_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("provider_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for StorageDealDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_statuses() {
        assert!(DealStatus::Pending.is_open());
        assert!(DealStatus::Published.is_open());
        assert!(DealStatus::Active.is_open());
        assert!(!DealStatus::Expired.is_open());
        assert!(!DealStatus::Slashed.is_open());
    }

    #[test]
    fn test_transitions_are_forward_only() {
        assert!(DealStatus::Pending.can_transition(DealStatus::Published));
        assert!(DealStatus::Published.can_transition(DealStatus::Active));
        assert!(DealStatus::Active.can_transition(DealStatus::Expired));
        assert!(DealStatus::Active.can_transition(DealStatus::Slashed));

        assert!(!DealStatus::Active.can_transition(DealStatus::Pending));
        assert!(!DealStatus::Expired.can_transition(DealStatus::Active));
        assert!(!DealStatus::Failed.can_transition(DealStatus::Pending));
    }

    #[test]
    fn test_ledger_state_mapping() {
        assert_eq!(map_ledger_state("StorageDealActive"), Some(DealStatus::Active));
        assert_eq!(map_ledger_state("StorageDealSealing"), Some(DealStatus::Published));
        assert_eq!(map_ledger_state("StorageDealSlashed"), Some(DealStatus::Slashed));
        assert_eq!(map_ledger_state("StorageDealError"), Some(DealStatus::Failed));
        assert_eq!(map_ledger_state("SomethingNew"), None);
    }

    #[test]
    fn test_needs_renewal() {
        let mut deal = StorageDealDoc::new(
            Uuid::new_v4(),
            "bafyDeal".into(),
            "f01000".into(),
            1000,
            100_000,
            0.5,
        );
        // Pending deals are never renewal candidates
        assert!(!deal.needs_renewal(95_000, 20_160));

        deal.status = DealStatus::Active;
        assert!(deal.needs_renewal(95_000, 20_160));
        assert!(!deal.needs_renewal(10_000, 20_160));
    }
}
