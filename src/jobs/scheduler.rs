//! Job executor pool and periodic triggers
//!
//! Pulls batches from the durable consumer and dispatches them across a
//! bounded number of concurrent executors. Transient failures are NAKed
//! with a fixed backoff until the delivery budget is spent, at which
//! point the owning request is failed terminally. Three timers enqueue
//! the periodic manager jobs; shutdown drains in-flight work up to a
//! bounded deadline and abandons the rest to redelivery.

use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::AckKind;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Args;
use crate::jobs::job::Job;
use crate::jobs::queue::JobQueue;
use crate::services::cleanup::CleanupManager;
use crate::services::monitor::DealMonitor;
use crate::services::processor::PinProcessor;
use crate::services::renewal::RenewalManager;
use crate::store::PinStore;
use crate::types::{HoldfastError, Result};

/// How long an empty fetch waits for messages
const FETCH_WAIT: Duration = Duration::from_secs(5);

/// Pending requests re-enqueued per startup sweep
const STALE_REQUEUE_LIMIT: i64 = 100;

/// Scheduler tuning, lifted from Args
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub monitor_interval: Duration,
    pub renewal_interval: Duration,
    pub cleanup_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl SchedulerConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            concurrency: args.worker_concurrency,
            max_attempts: args.job_max_attempts,
            retry_backoff: Duration::from_secs(args.job_retry_backoff_secs),
            monitor_interval: Duration::from_secs(args.monitor_interval_secs),
            renewal_interval: Duration::from_secs(args.renewal_interval_secs),
            cleanup_interval: Duration::from_secs(args.cleanup_interval_secs),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        }
    }
}

/// What to do with a delivered job after execution
#[derive(Debug, PartialEq, Eq)]
enum Disposition {
    /// Done (success, benign no-op, or committed terminal failure)
    Ack,
    /// Transient failure within budget: redeliver after the backoff
    Retry(Duration),
    /// Transient failure, budget spent: fail the request, then ack
    FailTerminally,
}

/// Decide a job's fate from the error and the delivery count
fn disposition(
    err: &HoldfastError,
    delivered: i64,
    max_attempts: u32,
    backoff: Duration,
) -> Disposition {
    if !err.is_transient() {
        // Permanent and internal errors are not worth redelivering; the
        // pipeline has already committed what it could.
        return Disposition::Ack;
    }

    if delivered < max_attempts as i64 {
        Disposition::Retry(backoff)
    } else {
        Disposition::FailTerminally
    }
}

/// Handle for requesting cooperative shutdown
pub struct SchedulerHandle {
    tx: watch::Sender<bool>,
}

impl SchedulerHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Create the shutdown signal pair
pub fn shutdown_channel() -> (SchedulerHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (SchedulerHandle { tx }, rx)
}

/// The worker-side orchestrator: executors plus periodic triggers
pub struct JobScheduler {
    queue: JobQueue,
    processor: Arc<PinProcessor>,
    monitor: Arc<DealMonitor>,
    renewal: Arc<RenewalManager>,
    cleanup: Arc<CleanupManager>,
    pins: Arc<dyn PinStore>,
    config: SchedulerConfig,
}

impl JobScheduler {
    pub fn new(
        queue: JobQueue,
        processor: Arc<PinProcessor>,
        monitor: Arc<DealMonitor>,
        renewal: Arc<RenewalManager>,
        cleanup: Arc<CleanupManager>,
        pins: Arc<dyn PinStore>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            queue,
            processor,
            monitor,
            renewal,
            cleanup,
            pins,
            config,
        }
    }

    /// Run until shutdown is signalled. In-flight jobs get a bounded
    /// drain deadline; whatever is still running past it is abandoned
    /// and completes or fails via redelivery.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let stream = self.queue.ensure_stream().await?;
        let consumer = self
            .queue
            .ensure_consumer(&stream, self.config.max_attempts)
            .await?;

        self.requeue_stale_pending().await;
        self.spawn_periodic_triggers(&shutdown);

        info!(
            concurrency = self.config.concurrency,
            max_attempts = self.config.max_attempts,
            backoff_secs = self.config.retry_backoff.as_secs(),
            "Job scheduler started"
        );

        loop {
            let batch = self.process_batch(&consumer);
            tokio::pin!(batch);

            tokio::select! {
                _ = shutdown.changed() => {
                    info!(
                        deadline_secs = self.config.shutdown_timeout.as_secs(),
                        "Shutdown requested, draining in-flight jobs"
                    );
                    match tokio::time::timeout(self.config.shutdown_timeout, &mut batch).await {
                        Ok(_) => info!("In-flight jobs drained"),
                        Err(_) => warn!(
                            "Drain deadline exceeded, abandoning in-flight jobs to redelivery"
                        ),
                    }
                    return Ok(());
                }
                result = &mut batch => {
                    if let Err(e) = result {
                        error!(error = %e, "Error processing batch");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    /// Pending requests whose processing job never ran (an enqueue that
    /// failed after the insert, or a stream wipe) are re-enqueued at
    /// startup. Harmless for requests with a job already queued: the
    /// pipeline's reload guard makes the duplicate a no-op.
    async fn requeue_stale_pending(&self) {
        let pending = match self.pins.pending(STALE_REQUEUE_LIMIT).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Could not scan for stale pending requests");
                return;
            }
        };

        if pending.is_empty() {
            return;
        }

        let mut requeued = 0usize;
        for request in &pending {
            let job = Job::ProcessPin {
                request_id: request.id,
            };
            match self.queue.enqueue(&job).await {
                Ok(()) => requeued += 1,
                Err(e) => warn!(request_id = %request.id, error = %e, "Stale re-enqueue failed"),
            }
        }

        info!(requeued, "Re-enqueued pending requests at startup");
    }

    /// One timer task per periodic manager; each tick enqueues the
    /// manager's job so executors run it with everything else.
    fn spawn_periodic_triggers(&self, shutdown: &watch::Receiver<bool>) {
        let triggers = [
            (Job::MonitorDeals, self.config.monitor_interval),
            (Job::RenewExpiring, self.config.renewal_interval),
            (Job::CleanupFailed, self.config.cleanup_interval),
        ];

        for (job, period) in triggers {
            let queue = self.queue.clone();
            let mut shutdown = shutdown.clone();

            tokio::spawn(async move {
                let start = tokio::time::Instant::now() + period;
                let mut ticker = tokio::time::interval_at(start, period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = ticker.tick() => {
                            if let Err(e) = queue.enqueue(&job).await {
                                error!(job = %job, error = %e, "Failed to enqueue periodic job");
                            }
                        }
                    }
                }
            });
        }
    }

    /// Fetch up to one executor-pool's worth of messages and process
    /// them concurrently. Returns the batch size.
    async fn process_batch(&self, consumer: &PullConsumer) -> Result<usize> {
        let mut messages = consumer
            .fetch()
            .max_messages(self.config.concurrency)
            .expires(FETCH_WAIT)
            .messages()
            .await
            .map_err(|e| HoldfastError::Queue(format!("Failed to fetch messages: {e}")))?;

        let mut batch = Vec::new();
        while let Some(next) = messages.next().await {
            match next {
                Ok(message) => batch.push(message),
                Err(e) => warn!(error = %e, "Error receiving message"),
            }
        }

        let count = batch.len();
        stream::iter(batch)
            .for_each_concurrent(self.config.concurrency, |message| {
                self.process_message(message)
            })
            .await;

        Ok(count)
    }

    /// Execute one delivered job and settle its acknowledgement
    async fn process_message(&self, message: async_nats::jetstream::Message) {
        let job: Job = match serde_json::from_slice(&message.payload) {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "Unparseable job payload, dropping");
                ack(&message).await;
                return;
            }
        };

        let delivered = message.info().map(|i| i.delivered).unwrap_or(1);

        match self.execute(&job).await {
            Ok(()) => {
                ack(&message).await;
            }
            Err(e) => match disposition(&e, delivered, self.config.max_attempts, self.config.retry_backoff) {
                Disposition::Ack => {
                    error!(job = %job, error = %e, "Job failed without retry");
                    ack(&message).await;
                }
                Disposition::Retry(backoff) => {
                    warn!(
                        job = %job,
                        error = %e,
                        attempt = delivered,
                        max_attempts = self.config.max_attempts,
                        "Transient job failure, redelivering"
                    );
                    if let Err(e) = message.ack_with(AckKind::Nak(Some(backoff))).await {
                        warn!(error = %e, "Failed to NAK message");
                    }
                }
                Disposition::FailTerminally => {
                    if let Job::ProcessPin { request_id } = job {
                        if let Err(fail_err) = self
                            .processor
                            .fail_after_retries(request_id, &e.to_string())
                            .await
                        {
                            error!(
                                request_id = %request_id,
                                error = %fail_err,
                                "Could not record terminal failure"
                            );
                        }
                    } else {
                        warn!(job = %job, error = %e, "Periodic job exhausted its retry budget");
                    }
                    ack(&message).await;
                }
            },
        }
    }

    /// Dispatch a job to its service
    async fn execute(&self, job: &Job) -> Result<()> {
        match job {
            Job::ProcessPin { request_id } => {
                self.processor.process(*request_id).await?;
                Ok(())
            }
            Job::MonitorDeals => self.monitor.run_pass().await.map(|_| ()),
            Job::RenewExpiring => self.renewal.run_pass().await.map(|_| ()),
            Job::CleanupFailed => self.cleanup.run_pass().await.map(|_| ()),
        }
    }
}

async fn ack(message: &async_nats::jetstream::Message) {
    if let Err(e) = message.ack().await {
        warn!(error = %e, "Failed to ack message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_retry_within_budget() {
        let err = HoldfastError::Transient("ipfs down".into());
        let backoff = Duration::from_secs(30);

        assert_eq!(
            disposition(&err, 1, 5, backoff),
            Disposition::Retry(backoff)
        );
        assert_eq!(
            disposition(&err, 4, 5, backoff),
            Disposition::Retry(backoff)
        );
    }

    #[test]
    fn test_budget_exhaustion_fails_terminally() {
        let err = HoldfastError::Transient("ipfs down".into());
        let backoff = Duration::from_secs(30);

        assert_eq!(disposition(&err, 5, 5, backoff), Disposition::FailTerminally);
        assert_eq!(disposition(&err, 9, 5, backoff), Disposition::FailTerminally);
    }

    #[test]
    fn test_permanent_errors_never_retry() {
        let err = HoldfastError::Permanent("rejected".into());
        assert_eq!(
            disposition(&err, 1, 5, Duration::from_secs(30)),
            Disposition::Ack
        );

        let err = HoldfastError::Internal("bug".into());
        assert_eq!(
            disposition(&err, 1, 5, Duration::from_secs(30)),
            Disposition::Ack
        );
    }
}
