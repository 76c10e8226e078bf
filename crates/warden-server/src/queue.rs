//! Bounded FIFO admission queue drained by a fixed-period clock.
//!
//! Submission is a synchronous length check plus push. A dedicated clock task
//! pops at most one job per tick and hands it to its own task, so a slow or
//! failing job never delays the next tick. Neither side holds the lock across
//! an await point.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

use crate::error::UpstreamError;

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("admission queue is full ({capacity} pending)")]
pub struct QueueFull {
    pub capacity: usize,
}

/// A job admitted into the queue: its 1-based position at submission time and
/// the receiver its result will arrive on.
pub struct Admission<T> {
    pub position: usize,
    outcome: oneshot::Receiver<Result<T, UpstreamError>>,
}

impl<T> Admission<T> {
    /// Waits until the clock has started the job and the job has finished. A
    /// job that panicked or was discarded resolves as [`UpstreamError::Dropped`].
    pub async fn outcome(self) -> Result<T, UpstreamError> {
        self.outcome.await.unwrap_or(Err(UpstreamError::Dropped))
    }
}

struct Pending {
    jobs: Mutex<VecDeque<Job>>,
    capacity: usize,
}

impl Pending {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct AdmissionQueue {
    pending: Arc<Pending>,
    clock: JoinHandle<()>,
}

impl AdmissionQueue {
    /// Starts the clock. The first dequeue happens one `period` from now. Must
    /// be called inside a tokio runtime.
    pub fn start(period: Duration, capacity: usize) -> Self {
        let pending = Arc::new(Pending {
            jobs: Mutex::new(VecDeque::new()),
            capacity,
        });
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let clock = tokio::spawn(run_clock(Arc::clone(&pending), ticker));
        Self { pending, clock }
    }

    /// Appends `job` unless the queue already holds `capacity` jobs. Returns the
    /// job's 1-based position.
    pub fn submit(&self, job: Job) -> Result<usize, QueueFull> {
        let mut jobs = self.pending.lock();
        if jobs.len() >= self.pending.capacity {
            return Err(QueueFull {
                capacity: self.pending.capacity,
            });
        }
        jobs.push_back(job);
        Ok(jobs.len())
    }

    /// Like [`submit`](Self::submit), for a job that produces a result.
    pub fn submit_with_result<T, F>(&self, work: F) -> Result<Admission<T>, QueueFull>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let position = self.submit(Box::pin(async move {
            let _ = tx.send(work.await);
        }))?;
        Ok(Admission {
            position,
            outcome: rx,
        })
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for AdmissionQueue {
    fn drop(&mut self) {
        self.clock.abort();
    }
}

async fn run_clock(pending: Arc<Pending>, mut ticker: Interval) {
    loop {
        ticker.tick().await;
        let job = pending.lock().pop_front();
        if let Some(job) = job {
            debug!("admission queue released one job");
            tokio::spawn(job);
        }
    }
}
