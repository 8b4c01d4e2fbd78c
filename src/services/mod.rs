//! Services layer for Holdfast
//!
//! Business logic between the HTTP surface, the job queue, and the
//! external collaborators.
//!
//! ## Services
//!
//! - **Gateway**: request validation, persistence, enqueue, queries
//! - **Processor**: the per-request pin-to-deal pipeline
//! - **Negotiate**: provider ranking and deal opening
//! - **Monitor**: periodic deal-state reconciliation against the ledger
//! - **Renewal**: successor deals for contracts close to expiry
//! - **Cleanup**: retention sweep over failed requests

pub mod cleanup;
pub mod gateway;
pub mod monitor;
pub mod negotiate;
pub mod processor;
pub mod renewal;

pub use cleanup::CleanupManager;
pub use gateway::{PinGateway, ServiceStats, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use monitor::{DealMonitor, MonitorSummary};
pub use negotiate::{provider_score, select_provider, DealBroker};
pub use processor::{PinProcessor, PipelineOutcome};
pub use renewal::{RenewalManager, RenewalSummary};
