//! API key document schema
//!
//! Keys are provisioned out of band and stored hashed. A lookup resolves
//! the SHA-256 digest of the presented key to the owning account.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for API keys
pub const API_KEY_COLLECTION: &str = "api_keys";

/// API key document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ApiKeyDoc {
    /// Key identity
    #[serde(rename = "_id")]
    pub id: Uuid,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// SHA-256 digest of the key, hex encoded
    pub key_hash: String,

    /// Owning account
    pub owner_id: Uuid,

    /// Whether the key is accepted
    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Free-form label for key management
    #[serde(default)]
    pub label: String,
}

fn default_true() -> bool {
    true
}

impl ApiKeyDoc {
    /// Create a new active key document for an owner
    pub fn new(owner_id: Uuid, raw_key: &str, label: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            metadata: Metadata::new(),
            key_hash: hash_key(raw_key),
            owner_id,
            is_active: true,
            label,
        }
    }
}

/// Hash a raw API key for storage and lookup
pub fn hash_key(raw_key: &str) -> String {
    let digest = Sha256::digest(raw_key.as_bytes());
    hex::encode(digest)
}

/// Generate a fresh random API key (hex, 64 characters)
pub fn generate_key() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl IntoIndexes for ApiKeyDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "key_hash": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("key_hash_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "owner_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("owner_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ApiKeyDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(hash_key("secret"), hash_key("secret"));
        assert_ne!(hash_key("secret"), hash_key("other"));
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let a = generate_key();
        let b = generate_key();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }
}
