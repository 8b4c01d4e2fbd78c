//! Job scheduling: typed jobs, the durable queue, and the executor pool

pub mod job;
pub mod queue;
pub mod scheduler;

use async_trait::async_trait;
use std::sync::Mutex;

use crate::types::Result;

pub use job::{Job, SUBJECT_PREFIX};
pub use queue::{JobQueue, CONSUMER_NAME, RATE_LIMIT_BUCKET, STREAM_NAME};
pub use scheduler::{JobScheduler, SchedulerHandle};

/// Anything that accepts jobs for asynchronous execution. The gateway
/// only needs this much of the queue; tests substitute an in-memory sink.
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn enqueue(&self, job: &Job) -> Result<()>;
}

#[async_trait]
impl JobSink for JobQueue {
    async fn enqueue(&self, job: &Job) -> Result<()> {
        JobQueue::enqueue(self, job).await
    }
}

/// Records enqueued jobs instead of delivering them
#[derive(Default)]
pub struct MemoryJobSink {
    jobs: Mutex<Vec<Job>>,
}

impl MemoryJobSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobSink for MemoryJobSink {
    async fn enqueue(&self, job: &Job) -> Result<()> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }
}
