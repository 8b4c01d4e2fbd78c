//! Typed job variants
//!
//! One closed enum, one variant per job kind. The queue carries these as
//! tagged JSON; there are no string-keyed argument bags to re-validate at
//! execution time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subject prefix for all queue traffic
pub const SUBJECT_PREFIX: &str = "holdfast.jobs";

/// A unit of asynchronous work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Drive one pin request through the placement/negotiation pipeline
    ProcessPin { request_id: Uuid },
    /// Reconcile open deals against the ledger
    MonitorDeals,
    /// Renew deals close to expiry
    RenewExpiring,
    /// Sweep old failed requests
    CleanupFailed,
}

impl Job {
    /// Stable name, used for logging and subject routing
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProcessPin { .. } => "process_pin",
            Self::MonitorDeals => "monitor_deals",
            Self::RenewExpiring => "renew_expiring",
            Self::CleanupFailed => "cleanup_failed",
        }
    }

    /// Queue subject this job is published on
    pub fn subject(&self) -> String {
        format!("{SUBJECT_PREFIX}.{}", self.name())
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessPin { request_id } => write!(f, "process_pin({request_id})"),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let job = Job::ProcessPin {
            request_id: Uuid::new_v4(),
        };
        let encoded = serde_json::to_vec(&job).unwrap();
        let decoded: Job = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(job, decoded);
    }

    #[test]
    fn test_tagged_encoding() {
        let encoded = serde_json::to_string(&Job::MonitorDeals).unwrap();
        assert_eq!(encoded, r#"{"kind":"monitor_deals"}"#);
    }

    #[test]
    fn test_subjects() {
        let job = Job::ProcessPin {
            request_id: Uuid::new_v4(),
        };
        assert_eq!(job.subject(), "holdfast.jobs.process_pin");
        assert_eq!(Job::CleanupFailed.subject(), "holdfast.jobs.cleanup_failed");
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result: Result<Job, _> = serde_json::from_str(r#"{"kind":"mystery"}"#);
        assert!(result.is_err());
    }
}
