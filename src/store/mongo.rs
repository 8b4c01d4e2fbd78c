//! MongoDB-backed repositories

use async_trait::async_trait;
use bson::{doc, DateTime};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::CleanupAction;
use crate::db::schemas::{
    DealStatus, PinRequestDoc, PinStatus, StorageDealDoc, DEAL_COLLECTION, PIN_REQUEST_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::types::{HoldfastError, Result};

use super::{DealStore, PinStore, ALL_DEAL_STATUSES, ALL_PIN_STATUSES};

/// Pin request repository over MongoDB
#[derive(Clone)]
pub struct MongoPinStore {
    collection: MongoCollection<PinRequestDoc>,
}

impl MongoPinStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: client.collection(PIN_REQUEST_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl PinStore for MongoPinStore {
    async fn create(&self, request: PinRequestDoc) -> Result<()> {
        self.collection.insert_one(request).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<PinRequestDoc>> {
        self.collection.find_one(doc! { "_id": uuid_bson(id) }).await
    }

    async fn get_owned(&self, id: Uuid, owner_id: Uuid) -> Result<Option<PinRequestDoc>> {
        self.collection
            .find_one(doc! { "_id": uuid_bson(id), "owner_id": uuid_bson(owner_id) })
            .await
    }

    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        page: u64,
        limit: u64,
        status: Option<PinStatus>,
    ) -> Result<(Vec<PinRequestDoc>, u64)> {
        let mut filter = doc! { "owner_id": uuid_bson(owner_id) };
        if let Some(status) = status {
            filter.insert("status", status.as_str());
        }

        self.collection
            .find_page(filter, doc! { "metadata.created_at": -1 }, page, limit)
            .await
    }

    async fn find_by_cid(&self, cid: &str) -> Result<Vec<PinRequestDoc>> {
        self.collection
            .find_many(doc! { "cid": cid }, Some(doc! { "metadata.created_at": -1 }), None)
            .await
    }

    async fn pending(&self, limit: i64) -> Result<Vec<PinRequestDoc>> {
        self.collection
            .find_many(
                doc! { "status": PinStatus::Pending.as_str() },
                Some(doc! { "metadata.created_at": 1 }),
                Some(limit),
            )
            .await
    }

    async fn commit_pinned(
        &self,
        id: Uuid,
        size_bytes: i64,
        price_fil: Decimal,
    ) -> Result<Option<PinRequestDoc>> {
        self.collection
            .find_one_and_update(
                doc! { "_id": uuid_bson(id), "status": PinStatus::Pending.as_str() },
                doc! { "$set": {
                    "status": PinStatus::Pinned.as_str(),
                    "size_bytes": size_bytes,
                    "price_fil": price_fil.to_string(),
                }},
            )
            .await
    }

    async fn commit_failed(&self, id: Uuid, reason: &str) -> Result<Option<PinRequestDoc>> {
        self.collection
            .find_one_and_update(
                doc! { "_id": uuid_bson(id), "status": PinStatus::Pending.as_str() },
                doc! { "$set": {
                    "status": PinStatus::Failed.as_str(),
                    "failure_reason": reason,
                }},
            )
            .await
    }

    async fn cancel(&self, id: Uuid, owner_id: Uuid) -> Result<Option<PinRequestDoc>> {
        self.collection
            .find_one_and_update(
                doc! {
                    "_id": uuid_bson(id),
                    "owner_id": uuid_bson(owner_id),
                    "status": PinStatus::Pending.as_str(),
                },
                doc! { "$set": { "status": PinStatus::Cancelled.as_str() } },
            )
            .await
    }

    async fn counts_by_status(&self) -> Result<Vec<(PinStatus, u64)>> {
        let mut counts = Vec::with_capacity(ALL_PIN_STATUSES.len());
        for status in ALL_PIN_STATUSES {
            let count = self.collection.count(doc! { "status": status.as_str() }).await?;
            counts.push((status, count));
        }
        Ok(counts)
    }

    async fn sweep_failed(&self, cutoff: DateTime, action: CleanupAction) -> Result<u64> {
        let filter = doc! {
            "status": PinStatus::Failed.as_str(),
            "metadata.updated_at": { "$lt": cutoff },
        };

        match action {
            CleanupAction::Archive => {
                let mut filter = filter;
                filter.insert("metadata.is_deleted", doc! { "$ne": true });
                let result = self.collection.soft_delete(filter).await?;
                Ok(result.modified_count)
            }
            CleanupAction::Delete => {
                let result = self.collection.delete_many(filter).await?;
                Ok(result.deleted_count)
            }
        }
    }
}

/// Storage deal repository over MongoDB
#[derive(Clone)]
pub struct MongoDealStore {
    collection: MongoCollection<StorageDealDoc>,
}

impl MongoDealStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: client.collection(DEAL_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl DealStore for MongoDealStore {
    async fn create(&self, deal: StorageDealDoc) -> Result<()> {
        self.collection.insert_one(deal).await
    }

    async fn for_request(&self, pin_request_id: Uuid) -> Result<Vec<StorageDealDoc>> {
        self.collection
            .find_many(
                doc! { "pin_request_id": uuid_bson(pin_request_id) },
                Some(doc! { "metadata.created_at": 1 }),
                None,
            )
            .await
    }

    async fn open_deals(&self) -> Result<Vec<StorageDealDoc>> {
        let open: Vec<&str> = [DealStatus::Pending, DealStatus::Published, DealStatus::Active]
            .iter()
            .map(|s| s.as_str())
            .collect();

        self.collection
            .find_many(doc! { "status": { "$in": open } }, None, None)
            .await
    }

    async fn expiring(&self, epoch_threshold: i64) -> Result<Vec<StorageDealDoc>> {
        self.collection
            .find_many(
                doc! {
                    "status": DealStatus::Active.as_str(),
                    "end_epoch": { "$lte": epoch_threshold },
                },
                Some(doc! { "end_epoch": 1 }),
                None,
            )
            .await
    }

    async fn update_status(&self, id: Uuid, from: DealStatus, to: DealStatus) -> Result<bool> {
        if !from.can_transition(to) {
            return Err(HoldfastError::InvalidState(format!(
                "illegal deal transition {from} -> {to}"
            )));
        }

        let updated = self
            .collection
            .find_one_and_update(
                doc! { "_id": uuid_bson(id), "status": from.as_str() },
                doc! { "$set": { "status": to.as_str() } },
            )
            .await?;

        Ok(updated.is_some())
    }

    async fn counts_by_status(&self) -> Result<Vec<(DealStatus, u64)>> {
        let mut counts = Vec::with_capacity(ALL_DEAL_STATUSES.len());
        for status in ALL_DEAL_STATUSES {
            let count = self.collection.count(doc! { "status": status.as_str() }).await?;
            counts.push((status, count));
        }
        Ok(counts)
    }
}

/// Uuids serialize as their hyphenated string form; queries must match
fn uuid_bson(id: Uuid) -> String {
    id.to_string()
}
