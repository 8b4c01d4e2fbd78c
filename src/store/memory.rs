//! In-memory repositories
//!
//! Mirror the MongoDB repositories' semantics over plain vectors. Used by
//! tests and by nothing else; the conditional-transition behavior here is
//! deliberately identical to the Mongo implementations so pipeline tests
//! exercise the same guarantees.

use async_trait::async_trait;
use bson::DateTime;
use rust_decimal::Decimal;
use std::sync::Mutex;
use uuid::Uuid;

use crate::config::CleanupAction;
use crate::db::schemas::{DealStatus, PinRequestDoc, PinStatus, StorageDealDoc};
use crate::types::{HoldfastError, Result};

use super::{DealStore, PinStore, ALL_DEAL_STATUSES, ALL_PIN_STATUSES};

/// Row with an insertion sequence for stable newest-first ordering even
/// when timestamps collide within a millisecond.
struct Row<T> {
    seq: u64,
    doc: T,
}

#[derive(Default)]
pub struct MemoryPinStore {
    rows: Mutex<Vec<Row<PinRequestDoc>>>,
}

impl MemoryPinStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite a row's updated_at so retention tests can age it
    #[cfg(test)]
    pub fn backdate_for_test(&self, id: Uuid, stamp: DateTime) {
        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter_mut() {
            if row.doc.id == id {
                row.doc.metadata.updated_at = Some(stamp);
            }
        }
    }

    /// Snapshot of every live row, for assertions
    pub fn all(&self) -> Vec<PinRequestDoc> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.doc.metadata.is_deleted)
            .map(|r| r.doc.clone())
            .collect()
    }
}

#[async_trait]
impl PinStore for MemoryPinStore {
    async fn create(&self, mut request: PinRequestDoc) -> Result<()> {
        request.metadata.created_at = Some(DateTime::now());
        request.metadata.updated_at = Some(DateTime::now());

        let mut rows = self.rows.lock().unwrap();
        let seq = rows.len() as u64;
        rows.push(Row { seq, doc: request });
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PinRequestDoc>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.doc.id == id && !r.doc.metadata.is_deleted)
            .map(|r| r.doc.clone()))
    }

    async fn get_owned(&self, id: Uuid, owner_id: Uuid) -> Result<Option<PinRequestDoc>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| {
                r.doc.id == id && r.doc.owner_id == owner_id && !r.doc.metadata.is_deleted
            })
            .map(|r| r.doc.clone()))
    }

    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        page: u64,
        limit: u64,
        status: Option<PinStatus>,
    ) -> Result<(Vec<PinRequestDoc>, u64)> {
        let rows = self.rows.lock().unwrap();
        let mut matching: Vec<&Row<PinRequestDoc>> = rows
            .iter()
            .filter(|r| {
                r.doc.owner_id == owner_id
                    && !r.doc.metadata.is_deleted
                    && status.map_or(true, |s| r.doc.status == s)
            })
            .collect();

        // Newest first
        matching.sort_by(|a, b| {
            b.doc
                .metadata
                .created_at
                .cmp(&a.doc.metadata.created_at)
                .then(b.seq.cmp(&a.seq))
        });

        let total = matching.len() as u64;
        let skip = ((page - 1) * limit) as usize;
        let items = matching
            .into_iter()
            .skip(skip)
            .take(limit as usize)
            .map(|r| r.doc.clone())
            .collect();

        Ok((items, total))
    }

    async fn find_by_cid(&self, cid: &str) -> Result<Vec<PinRequestDoc>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.doc.cid == cid && !r.doc.metadata.is_deleted)
            .map(|r| r.doc.clone())
            .collect())
    }

    async fn pending(&self, limit: i64) -> Result<Vec<PinRequestDoc>> {
        let rows = self.rows.lock().unwrap();
        let mut matching: Vec<&Row<PinRequestDoc>> = rows
            .iter()
            .filter(|r| r.doc.status == PinStatus::Pending && !r.doc.metadata.is_deleted)
            .collect();
        matching.sort_by_key(|r| (r.doc.metadata.created_at, r.seq));

        Ok(matching
            .into_iter()
            .take(limit as usize)
            .map(|r| r.doc.clone())
            .collect())
    }

    async fn commit_pinned(
        &self,
        id: Uuid,
        size_bytes: i64,
        price_fil: Decimal,
    ) -> Result<Option<PinRequestDoc>> {
        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter_mut() {
            if row.doc.id == id && row.doc.status == PinStatus::Pending {
                row.doc.status = PinStatus::Pinned;
                row.doc.size_bytes = size_bytes;
                row.doc.price_fil = price_fil;
                row.doc.metadata.updated_at = Some(DateTime::now());
                return Ok(Some(row.doc.clone()));
            }
        }
        Ok(None)
    }

    async fn commit_failed(&self, id: Uuid, reason: &str) -> Result<Option<PinRequestDoc>> {
        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter_mut() {
            if row.doc.id == id && row.doc.status == PinStatus::Pending {
                row.doc.status = PinStatus::Failed;
                row.doc.failure_reason = Some(reason.to_string());
                row.doc.metadata.updated_at = Some(DateTime::now());
                return Ok(Some(row.doc.clone()));
            }
        }
        Ok(None)
    }

    async fn cancel(&self, id: Uuid, owner_id: Uuid) -> Result<Option<PinRequestDoc>> {
        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter_mut() {
            if row.doc.id == id
                && row.doc.owner_id == owner_id
                && row.doc.status == PinStatus::Pending
            {
                row.doc.status = PinStatus::Cancelled;
                row.doc.metadata.updated_at = Some(DateTime::now());
                return Ok(Some(row.doc.clone()));
            }
        }
        Ok(None)
    }

    async fn counts_by_status(&self) -> Result<Vec<(PinStatus, u64)>> {
        let rows = self.rows.lock().unwrap();
        Ok(ALL_PIN_STATUSES
            .iter()
            .map(|status| {
                let count = rows
                    .iter()
                    .filter(|r| r.doc.status == *status && !r.doc.metadata.is_deleted)
                    .count() as u64;
                (*status, count)
            })
            .collect())
    }

    async fn sweep_failed(&self, cutoff: DateTime, action: CleanupAction) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let is_stale = |doc: &PinRequestDoc| {
            doc.status == PinStatus::Failed
                && doc.metadata.updated_at.map_or(false, |t| t < cutoff)
        };

        match action {
            CleanupAction::Archive => {
                let mut affected = 0;
                for row in rows.iter_mut() {
                    if is_stale(&row.doc) && !row.doc.metadata.is_deleted {
                        row.doc.metadata.is_deleted = true;
                        row.doc.metadata.deleted_at = Some(DateTime::now());
                        affected += 1;
                    }
                }
                Ok(affected)
            }
            CleanupAction::Delete => {
                let before = rows.len();
                rows.retain(|r| !is_stale(&r.doc));
                Ok((before - rows.len()) as u64)
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryDealStore {
    rows: Mutex<Vec<Row<StorageDealDoc>>>,
}

impl MemoryDealStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<StorageDealDoc> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.doc.clone())
            .collect()
    }
}

#[async_trait]
impl DealStore for MemoryDealStore {
    async fn create(&self, mut deal: StorageDealDoc) -> Result<()> {
        deal.metadata.created_at = Some(DateTime::now());
        deal.metadata.updated_at = Some(DateTime::now());

        let mut rows = self.rows.lock().unwrap();
        let seq = rows.len() as u64;
        rows.push(Row { seq, doc: deal });
        Ok(())
    }

    async fn for_request(&self, pin_request_id: Uuid) -> Result<Vec<StorageDealDoc>> {
        let rows = self.rows.lock().unwrap();
        let mut matching: Vec<&Row<StorageDealDoc>> = rows
            .iter()
            .filter(|r| r.doc.pin_request_id == pin_request_id)
            .collect();
        matching.sort_by_key(|r| r.seq);
        Ok(matching.into_iter().map(|r| r.doc.clone()).collect())
    }

    async fn open_deals(&self) -> Result<Vec<StorageDealDoc>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.doc.status.is_open())
            .map(|r| r.doc.clone())
            .collect())
    }

    async fn expiring(&self, epoch_threshold: i64) -> Result<Vec<StorageDealDoc>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.doc.status == DealStatus::Active && r.doc.end_epoch <= epoch_threshold)
            .map(|r| r.doc.clone())
            .collect())
    }

    async fn update_status(&self, id: Uuid, from: DealStatus, to: DealStatus) -> Result<bool> {
        if !from.can_transition(to) {
            return Err(HoldfastError::InvalidState(format!(
                "illegal deal transition {from} -> {to}"
            )));
        }

        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter_mut() {
            if row.doc.id == id && row.doc.status == from {
                row.doc.status = to;
                row.doc.metadata.updated_at = Some(DateTime::now());
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn counts_by_status(&self) -> Result<Vec<(DealStatus, u64)>> {
        let rows = self.rows.lock().unwrap();
        Ok(ALL_DEAL_STATUSES
            .iter()
            .map(|status| {
                let count = rows.iter().filter(|r| r.doc.status == *status).count() as u64;
                (*status, count)
            })
            .collect())
    }
}
