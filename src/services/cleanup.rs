//! Cleanup manager
//!
//! Periodic sweep of terminally failed requests past the retention
//! window. Only failed rows are ever matched, so the sweep is safe to run
//! concurrently with the pin pipeline.

use bson::DateTime;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::info;

use crate::config::CleanupAction;
use crate::store::PinStore;
use crate::types::Result;

/// Sweeps old failed requests
pub struct CleanupManager {
    pins: Arc<dyn PinStore>,
    retention_days: i64,
    action: CleanupAction,
}

impl CleanupManager {
    pub fn new(pins: Arc<dyn PinStore>, retention_days: i64, action: CleanupAction) -> Self {
        Self {
            pins,
            retention_days,
            action,
        }
    }

    /// One sweep. Returns how many rows were archived or deleted.
    pub async fn run_pass(&self) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(self.retention_days);
        let swept = self
            .pins
            .sweep_failed(DateTime::from_chrono(cutoff), self.action)
            .await?;

        if swept > 0 {
            info!(
                swept,
                retention_days = self.retention_days,
                action = ?self.action,
                "Cleaned up failed requests"
            );
        }
        Ok(swept)
    }
}
