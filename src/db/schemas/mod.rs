//! Database schemas for Holdfast

pub mod api_key;
pub mod deal;
pub mod metadata;
pub mod pin_request;

pub use api_key::{generate_key, hash_key, ApiKeyDoc, API_KEY_COLLECTION};
pub use deal::{map_ledger_state, DealStatus, StorageDealDoc, DEAL_COLLECTION};
pub use metadata::Metadata;
pub use pin_request::{PinRequestDoc, PinStatus, PIN_REQUEST_COLLECTION};
