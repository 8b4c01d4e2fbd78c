//! Pin request document schema
//!
//! A pin request is the user-facing unit of work: one CID to keep stored
//! for a requested number of days. Its status is a closed state machine;
//! the only transitions out of Pending are made by the pin pipeline
//! (to Pinned or Failed) and by cancellation (to Cancelled).

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for pin requests
pub const PIN_REQUEST_COLLECTION: &str = "pin_requests";

/// Pin request lifecycle status
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PinStatus {
    Pending,
    Pinned,
    Failed,
    Cancelled,
}

impl PinStatus {
    /// Whether this status has no outgoing transitions
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Central transition table. Every status write goes through this;
    /// call sites never compare raw strings.
    pub fn can_transition(&self, to: PinStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Pinned)
                | (Self::Pending, Self::Failed)
                | (Self::Pending, Self::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Pinned => "pinned",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "pinned" => Some(Self::Pinned),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for PinStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pin request document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PinRequestDoc {
    /// Request identity
    #[serde(rename = "_id")]
    pub id: Uuid,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Owner identity
    pub owner_id: Uuid,

    /// Content identifier on the storage network
    pub cid: String,

    /// Lifecycle status
    pub status: PinStatus,

    /// Content size in bytes; zero until inspection succeeds
    #[serde(default)]
    pub size_bytes: i64,

    /// Quoted price in FIL; zero until the pipeline commits success.
    /// Serializes as a decimal string.
    #[serde(default)]
    pub price_fil: Decimal,

    /// Requested storage duration in days
    pub duration_days: i64,

    /// Root cause recorded when the request fails
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl PinRequestDoc {
    /// Create a new pending request with size and price unset
    pub fn new(owner_id: Uuid, cid: String, duration_days: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            metadata: Metadata::new(),
            owner_id,
            cid,
            status: PinStatus::Pending,
            size_bytes: 0,
            price_fil: Decimal::ZERO,
            duration_days,
            failure_reason: None,
        }
    }

    /// Whether the request can still be cancelled by its owner
    pub fn can_be_cancelled(&self) -> bool {
        self.status == PinStatus::Pending
    }
}

impl IntoIndexes for PinRequestDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Owner listing, newest first
            (
                doc! { "owner_id": 1, "metadata.created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("owner_created_index".to_string())
                        .build(),
                ),
            ),
            // Lookups by content identifier
            (
                doc! { "cid": 1 },
                Some(IndexOptions::builder().name("cid_index".to_string()).build()),
            ),
            // Status scans (pending re-enqueue, failed cleanup)
            (
                doc! { "status": 1, "metadata.updated_at": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_updated_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for PinRequestDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_is_the_only_live_state() {
        assert!(!PinStatus::Pending.is_terminal());
        assert!(PinStatus::Pinned.is_terminal());
        assert!(PinStatus::Failed.is_terminal());
        assert!(PinStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_transition_table() {
        assert!(PinStatus::Pending.can_transition(PinStatus::Pinned));
        assert!(PinStatus::Pending.can_transition(PinStatus::Failed));
        assert!(PinStatus::Pending.can_transition(PinStatus::Cancelled));

        // Terminal states reject everything, including self-loops
        for from in [PinStatus::Pinned, PinStatus::Failed, PinStatus::Cancelled] {
            for to in [
                PinStatus::Pending,
                PinStatus::Pinned,
                PinStatus::Failed,
                PinStatus::Cancelled,
            ] {
                assert!(!from.can_transition(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            PinStatus::Pending,
            PinStatus::Pinned,
            PinStatus::Failed,
            PinStatus::Cancelled,
        ] {
            assert_eq!(PinStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PinStatus::parse("bogus"), None);
    }

    #[test]
    fn test_new_request_starts_unset() {
        let req = PinRequestDoc::new(Uuid::new_v4(), "QmTest".into(), 30);
        assert_eq!(req.status, PinStatus::Pending);
        assert_eq!(req.size_bytes, 0);
        assert_eq!(req.price_fil, Decimal::ZERO);
        assert!(req.can_be_cancelled());
    }
}
