//! Configuration for Holdfast
//!
//! CLI arguments and environment variable handling using clap. Every
//! endpoint, secret, and tuning knob is an explicit field here; nothing is
//! read from ambient globals after startup.

use clap::Parser;
use rust_decimal::Decimal;
use std::net::SocketAddr;
use uuid::Uuid;

/// Holdfast - pinning orchestration service
///
/// Turns pin requests for IPFS content into time-bounded Filecoin storage
/// deals and tracks them until expiry, renewal, or cleanup.
#[derive(Parser, Debug, Clone)]
#[command(name = "holdfast")]
#[command(about = "IPFS pinning service backed by Filecoin storage deals")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on (gateway binary)
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (anonymous access, relaxed startup)
    #[arg(long, env = "DEV_MODE", default_value = "false", action = clap::ArgAction::Set)]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "holdfast")]
    pub mongodb_db: String,

    /// NATS configuration (job queue + rate-limit counters)
    #[command(flatten)]
    pub nats: NatsArgs,

    /// IPFS node HTTP API URL
    #[arg(long, env = "IPFS_API_URL", default_value = "http://localhost:5001")]
    pub ipfs_api_url: String,

    /// IPFS API request timeout in seconds
    #[arg(long, env = "IPFS_TIMEOUT_SECS", default_value = "30")]
    pub ipfs_timeout_secs: u64,

    /// Lotus JSON-RPC endpoint
    #[arg(long, env = "LOTUS_API_URL", default_value = "http://localhost:1234/rpc/v0")]
    pub lotus_api_url: String,

    /// Lotus API bearer token (optional)
    #[arg(long, env = "LOTUS_TOKEN")]
    pub lotus_token: Option<String>,

    /// Wallet address funding storage deals
    #[arg(long, env = "WALLET_ADDRESS", default_value = "")]
    pub wallet_address: String,

    /// Base storage price in FIL per GiB per month
    #[arg(long, env = "BASE_PRICE_PER_GB_MONTH", default_value = "0.001")]
    pub base_price_per_gb_month: Decimal,

    /// Markup applied on top of the base price, in percent
    #[arg(long, env = "MARKUP_PERCENT", default_value = "20")]
    pub markup_percent: Decimal,

    /// Minimum deal size in bytes; smaller content is priced at this floor
    #[arg(long, env = "MINIMUM_DEAL_SIZE", default_value = "1048576")]
    pub minimum_deal_size: u64,

    /// Chain epochs per day (30-second epochs)
    #[arg(long, env = "EPOCHS_PER_DAY", default_value = "2880")]
    pub epochs_per_day: i64,

    /// Deals within this many epochs of expiry are renewed (default 7 days)
    #[arg(long, env = "RENEWAL_THRESHOLD_EPOCHS", default_value = "20160")]
    pub renewal_threshold_epochs: i64,

    /// Number of concurrent job executors
    #[arg(long, env = "WORKER_CONCURRENCY", default_value = "5")]
    pub worker_concurrency: usize,

    /// Maximum delivery attempts for a processing job before it is failed
    #[arg(long, env = "JOB_MAX_ATTEMPTS", default_value = "5")]
    pub job_max_attempts: u32,

    /// Delay before a transiently failed job is redelivered, in seconds
    #[arg(long, env = "JOB_RETRY_BACKOFF_SECS", default_value = "30")]
    pub job_retry_backoff_secs: u64,

    /// Deal monitor interval in seconds
    #[arg(long, env = "MONITOR_INTERVAL_SECS", default_value = "300")]
    pub monitor_interval_secs: u64,

    /// Renewal check interval in seconds
    #[arg(long, env = "RENEWAL_INTERVAL_SECS", default_value = "3600")]
    pub renewal_interval_secs: u64,

    /// Failed-request cleanup interval in seconds
    #[arg(long, env = "CLEANUP_INTERVAL_SECS", default_value = "21600")]
    pub cleanup_interval_secs: u64,

    /// Failed requests older than this many days are swept
    #[arg(long, env = "CLEANUP_RETENTION_DAYS", default_value = "30")]
    pub cleanup_retention_days: i64,

    /// What the cleanup sweep does with old failed requests
    #[arg(long, env = "CLEANUP_ACTION", value_enum, default_value = "archive")]
    pub cleanup_action: CleanupAction,

    /// Unpin content after a failed negotiation to avoid storage leaks
    #[arg(long, env = "UNPIN_ON_FAILURE", default_value = "false")]
    pub unpin_on_failure: bool,

    /// Per-owner request budget per minute
    #[arg(long, env = "RATE_LIMIT_PER_MINUTE", default_value = "100")]
    pub rate_limit_per_minute: u64,

    /// JWT secret for bearer-token auth (required outside dev mode)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Bounded drain deadline for in-flight jobs at shutdown, in seconds
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value = "30")]
    pub shutdown_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Retention action applied by the cleanup sweep
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupAction {
    /// Soft-delete: the row survives but is hidden from all queries
    Archive,
    /// Hard-delete the row
    Delete,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

impl Args {
    /// Get effective JWT secret (uses default in dev mode)
    pub fn jwt_secret(&self) -> String {
        if self.dev_mode {
            self.jwt_secret
                .clone()
                .unwrap_or_else(|| "dev-only-insecure-secret".to_string())
        } else {
            self.jwt_secret
                .clone()
                .expect("JWT_SECRET is required in production mode")
        }
    }

    /// Contract length in epochs for a requested duration in days
    pub fn duration_epochs(&self, duration_days: i64) -> i64 {
        duration_days * self.epochs_per_day
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if self.worker_concurrency == 0 {
            return Err("WORKER_CONCURRENCY must be at least 1".to_string());
        }

        if self.job_max_attempts == 0 {
            return Err("JOB_MAX_ATTEMPTS must be at least 1".to_string());
        }

        if self.epochs_per_day <= 0 {
            return Err("EPOCHS_PER_DAY must be positive".to_string());
        }

        if !self.dev_mode && self.wallet_address.is_empty() {
            return Err("WALLET_ADDRESS is required in production mode".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_args() -> Args {
        Args::parse_from(["holdfast", "--dev-mode", "true"])
    }

    #[test]
    fn test_defaults() {
        let args = dev_args();
        assert_eq!(args.epochs_per_day, 2880);
        assert_eq!(args.job_max_attempts, 5);
        assert_eq!(args.job_retry_backoff_secs, 30);
        assert_eq!(args.monitor_interval_secs, 300);
        assert_eq!(args.renewal_interval_secs, 3600);
        assert_eq!(args.cleanup_interval_secs, 21600);
        assert_eq!(args.cleanup_action, CleanupAction::Archive);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_duration_epochs() {
        let args = dev_args();
        assert_eq!(args.duration_epochs(1), 2880);
        assert_eq!(args.duration_epochs(180), 518_400);
    }

    #[test]
    fn test_production_requires_secret() {
        let args = Args::parse_from(["holdfast"]);
        assert!(args.validate().is_err());
    }
}
