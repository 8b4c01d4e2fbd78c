//! Durable job queue over NATS JetStream
//!
//! One file-backed work-queue stream carries every job kind. Delivery is
//! at-least-once: consumers ack explicitly, and an unacked or NAKed
//! message comes back. `max_deliver` bounds redelivery so a poisoned job
//! cannot loop forever.

use async_nats::jetstream::{
    self,
    consumer::PullConsumer,
    kv,
    stream::{RetentionPolicy, StorageType, Stream},
};
use async_nats::ConnectOptions;
use std::time::Duration;
use tracing::info;

use crate::config::NatsArgs;
use crate::jobs::job::{Job, SUBJECT_PREFIX};
use crate::types::{HoldfastError, Result};

/// Stream holding all queued jobs
pub const STREAM_NAME: &str = "HOLDFAST_JOBS";

/// Durable consumer shared by every worker instance
pub const CONSUMER_NAME: &str = "holdfast_workers";

/// KV bucket for rate-limit counters
pub const RATE_LIMIT_BUCKET: &str = "holdfast_rate_limit";

/// Time a delivered message may stay unacked before redelivery. Long
/// enough for a full pipeline run including collaborator timeouts.
const ACK_WAIT: Duration = Duration::from_secs(300);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PING_INTERVAL: Duration = Duration::from_secs(120);

/// Handle to the job queue and its backing NATS connection
#[derive(Clone)]
pub struct JobQueue {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl JobQueue {
    /// Connect to NATS and return a queue handle
    pub async fn connect(args: &NatsArgs, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", args.nats_url);

        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(PING_INTERVAL)
            .connection_timeout(CONNECT_TIMEOUT);

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| HoldfastError::Queue(format!("Failed to connect to NATS: {e}")))?;

        let jetstream = jetstream::new(client.clone());

        info!("Connected to NATS at {}", args.nats_url);

        Ok(Self { client, jetstream })
    }

    /// Publish a job onto the durable stream
    pub async fn enqueue(&self, job: &Job) -> Result<()> {
        let payload = serde_json::to_vec(job)
            .map_err(|e| HoldfastError::Queue(format!("Failed to encode job: {e}")))?;

        self.jetstream
            .publish(job.subject(), payload.into())
            .await
            .map_err(|e| HoldfastError::Queue(format!("Failed to publish job: {e}")))?
            .await
            .map_err(|e| HoldfastError::Queue(format!("Job publish not acked: {e}")))?;

        Ok(())
    }

    /// Ensure the work-queue stream exists
    pub async fn ensure_stream(&self) -> Result<Stream> {
        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: STREAM_NAME.to_string(),
                subjects: vec![format!("{SUBJECT_PREFIX}.>")],
                retention: RetentionPolicy::WorkQueue,
                storage: StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| HoldfastError::Queue(format!("Failed to create stream: {e}")))?;

        info!(
            "Using stream {} with subjects {}.>",
            STREAM_NAME, SUBJECT_PREFIX
        );
        Ok(stream)
    }

    /// Ensure the shared durable consumer exists
    pub async fn ensure_consumer(&self, stream: &Stream, max_deliver: u32) -> Result<PullConsumer> {
        let consumer = stream
            .get_or_create_consumer(
                CONSUMER_NAME,
                jetstream::consumer::pull::Config {
                    durable_name: Some(CONSUMER_NAME.to_string()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ack_wait: ACK_WAIT,
                    filter_subject: format!("{SUBJECT_PREFIX}.>"),
                    max_deliver: max_deliver as i64,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| HoldfastError::Queue(format!("Failed to create consumer: {e}")))?;

        info!("Using consumer {}", CONSUMER_NAME);
        Ok(consumer)
    }

    /// Open (or create) the rate-limit counter bucket. Counters expire on
    /// their own via the bucket's max_age.
    pub async fn rate_limit_bucket(&self, window: Duration) -> Result<kv::Store> {
        if let Ok(store) = self.jetstream.get_key_value(RATE_LIMIT_BUCKET).await {
            return Ok(store);
        }

        self.jetstream
            .create_key_value(kv::Config {
                bucket: RATE_LIMIT_BUCKET.to_string(),
                max_age: window * 2,
                ..Default::default()
            })
            .await
            .map_err(|e| HoldfastError::Queue(format!("Failed to create KV bucket: {e}")))
    }

    /// The underlying NATS client
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }
}
