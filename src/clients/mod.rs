//! External collaborator clients
//!
//! The storage network (IPFS) and the deal ledger (Lotus) are reached
//! through traits so the pipeline is testable against in-memory mocks.

pub mod ipfs;
pub mod lotus;
pub mod mock;

pub use ipfs::{validate_cid, ContentStore, IpfsClient};
pub use lotus::{DealLedger, LotusClient, ProviderInfo, StartDealParams};
