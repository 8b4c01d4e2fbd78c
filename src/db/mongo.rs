//! MongoDB client and collection wrapper
//!
//! Typed collections with schema-declared indexes, automatic metadata
//! timestamps, and soft deletion. All repository queries go through this
//! wrapper so the is_deleted filter is applied in one place.

use bson::{doc, DateTime, Document};
use mongodb::{
    options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument, UpdateModifications},
    results::{DeleteResult, UpdateResult},
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, info};

use crate::db::schemas::Metadata;
use crate::types::HoldfastError;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client and verify the connection
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, HoldfastError> {
        info!("Connecting to MongoDB at {}", uri);

        // serverSelectionTimeoutMS avoids hanging on an unreachable server
        let timeout_uri = if uri.contains('?') {
            format!("{uri}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000")
        } else {
            format!("{uri}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000")
        };

        let client = Client::with_uri_str(&timeout_uri).await.map_err(|e| {
            HoldfastError::Database(format!("Failed to connect to MongoDB: {e}"))
        })?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| HoldfastError::Database(format!("MongoDB ping failed: {e}")))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection with its indexes applied
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, HoldfastError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    /// Create a new collection and apply indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, HoldfastError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<(), HoldfastError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| HoldfastError::Database(format!("Failed to create indexes: {e}")))?;

        Ok(())
    }

    /// Insert a document, setting metadata timestamps
    pub async fn insert_one(&self, mut item: T) -> Result<(), HoldfastError> {
        let metadata = item.mut_metadata();
        metadata.is_deleted = false;
        metadata.created_at = Some(DateTime::now());
        metadata.updated_at = Some(DateTime::now());

        self.inner
            .insert_one(item)
            .await
            .map_err(|e| HoldfastError::Database(format!("Insert failed: {e}")))?;

        Ok(())
    }

    /// Find one document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, HoldfastError> {
        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });

        self.inner
            .find_one(full_filter)
            .await
            .map_err(|e| HoldfastError::Database(format!("Find failed: {e}")))
    }

    /// Find many documents by filter, optionally sorted and capped
    pub async fn find_many(
        &self,
        filter: Document,
        sort: Option<Document>,
        limit: Option<i64>,
    ) -> Result<Vec<T>, HoldfastError> {
        use futures_util::StreamExt;

        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });

        let mut find = self.inner.find(full_filter);
        if let Some(sort) = sort {
            find = find.sort(sort);
        }
        if let Some(limit) = limit {
            find = find.limit(limit);
        }

        let cursor = find
            .await
            .map_err(|e| HoldfastError::Database(format!("Find failed: {e}")))?;

        let results: Vec<T> = cursor
            .filter_map(|item| async {
                match item {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    /// Find one page of documents plus the total matching count.
    /// The total is computed from the same filter, so it is independent
    /// of page and limit.
    pub async fn find_page(
        &self,
        filter: Document,
        sort: Document,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<T>, u64), HoldfastError> {
        use futures_util::StreamExt;

        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });

        let total = self
            .inner
            .count_documents(full_filter.clone())
            .await
            .map_err(|e| HoldfastError::Database(format!("Count failed: {e}")))?;

        let skip = (page - 1) * limit;
        let cursor = self
            .inner
            .find(full_filter)
            .sort(sort)
            .skip(skip)
            .limit(limit as i64)
            .await
            .map_err(|e| HoldfastError::Database(format!("Find failed: {e}")))?;

        let items: Vec<T> = cursor
            .filter_map(|item| async {
                match item {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok((items, total))
    }

    /// Update one document, bumping updated_at
    pub async fn update_one(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult, HoldfastError> {
        let update = with_updated_at(update);

        self.inner
            .update_one(filter, UpdateModifications::Document(update))
            .await
            .map_err(|e| HoldfastError::Database(format!("Update failed: {e}")))
    }

    /// Atomically update one document and return the new version, or None
    /// if the filter matched nothing. This is the conditional-commit
    /// primitive: callers put the expected current status in the filter.
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<Option<T>, HoldfastError> {
        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.inner
            .find_one_and_update(full_filter, with_updated_at(update))
            .with_options(options)
            .await
            .map_err(|e| HoldfastError::Database(format!("Update failed: {e}")))
    }

    /// Soft delete documents matching the filter
    pub async fn soft_delete(&self, filter: Document) -> Result<UpdateResult, HoldfastError> {
        let update = doc! {
            "$set": {
                "metadata.is_deleted": true,
                "metadata.deleted_at": DateTime::now(),
                "metadata.updated_at": DateTime::now(),
            }
        };

        self.inner
            .update_many(filter, update)
            .await
            .map_err(|e| HoldfastError::Database(format!("Soft delete failed: {e}")))
    }

    /// Hard delete documents matching the filter
    pub async fn delete_many(&self, filter: Document) -> Result<DeleteResult, HoldfastError> {
        self.inner
            .delete_many(filter)
            .await
            .map_err(|e| HoldfastError::Database(format!("Delete failed: {e}")))
    }

    /// Count documents matching the filter
    pub async fn count(&self, filter: Document) -> Result<u64, HoldfastError> {
        let mut full_filter = filter;
        full_filter.insert("metadata.is_deleted", doc! { "$ne": true });

        self.inner
            .count_documents(full_filter)
            .await
            .map_err(|e| HoldfastError::Database(format!("Count failed: {e}")))
    }

    /// Get the underlying collection for advanced operations
    pub fn inner(&self) -> &Collection<T> {
        &self.inner
    }
}

/// Merge an updated_at bump into a $set update document
fn with_updated_at(mut update: Document) -> Document {
    let mut set = update
        .get_document("$set")
        .ok()
        .cloned()
        .unwrap_or_default();
    set.insert("metadata.updated_at", DateTime::now());
    update.insert("$set", set);
    update
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_updated_at_merges_into_existing_set() {
        let update = with_updated_at(doc! { "$set": { "status": "pinned" } });
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("status").unwrap(), "pinned");
        assert!(set.get("metadata.updated_at").is_some());
    }

    #[test]
    fn test_with_updated_at_creates_set() {
        let update = with_updated_at(doc! { "$inc": { "attempts": 1 } });
        assert!(update.get_document("$set").unwrap().get("metadata.updated_at").is_some());
        assert!(update.get_document("$inc").is_ok());
    }
}
