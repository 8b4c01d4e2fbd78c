//! Holdfast - pinning orchestration service
//!
//! Accepts requests to durably store IPFS content and turns each one into
//! time-bounded Filecoin storage deals, tracking their lifecycle until
//! expiry, renewal, or cleanup.
//!
//! ## Components
//!
//! - **Gateway**: validates and persists requests, answers queries
//! - **Job scheduler**: durable at-least-once queue plus executor pool
//! - **Pin processor**: the per-request placement/negotiation pipeline
//! - **Deal monitor**: periodic reconciliation against the chain
//! - **Renewal manager**: successor deals before expiry
//! - **Cleanup manager**: retention sweep over failed requests

pub mod auth;
pub mod clients;
pub mod config;
pub mod db;
pub mod jobs;
pub mod pricing;
pub mod ratelimit;
pub mod routes;
pub mod server;
pub mod services;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{HoldfastError, Result};
