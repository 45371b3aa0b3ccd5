//! Bounded pool for background jobs.
//!
//! A fixed-capacity queue feeds a dispatcher that runs at most `concurrency`
//! tasks at once. Callers reserve a queue slot *before* doing anything
//! irreversible, so a saturated pool is reported while the job is still
//! untouched.
//!
//! ```text
//! try_reserve() ──► PoolPermit ──spawn(fut)──► queue ──► dispatcher ──► semaphore ──► task
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool queue is full")]
    Saturated,
    #[error("worker pool is shut down")]
    ShutDown,
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Tasks running at the same time
    pub concurrency: usize,
    /// Tasks waiting for a slot
    pub queue_capacity: usize,
    /// How long shutdown waits for in-flight tasks
    pub drain_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue_capacity: 32,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// A reserved queue slot. Dropping it gives the slot back.
pub struct PoolPermit {
    permit: mpsc::OwnedPermit<Task>,
}

impl PoolPermit {
    pub fn spawn<F>(self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.permit.send(Box::pin(task));
    }
}

pub struct WorkerPool {
    sender: mpsc::Sender<Task>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Start the dispatcher on the current runtime.
    pub fn start(config: WorkerPoolConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));

        let dispatcher = tokio::spawn(dispatch(
            receiver,
            semaphore,
            tracker.clone(),
            shutdown.clone(),
        ));

        info!(
            concurrency = config.concurrency,
            queue_capacity = config.queue_capacity,
            "Worker pool started"
        );

        Self {
            sender,
            shutdown,
            tracker,
            dispatcher: Mutex::new(Some(dispatcher)),
            config,
        }
    }

    /// Reserve a slot without waiting.
    pub fn try_reserve(&self) -> Result<PoolPermit, PoolError> {
        if self.shutdown.is_cancelled() {
            return Err(PoolError::ShutDown);
        }
        self.sender
            .clone()
            .try_reserve_owned()
            .map(|permit| PoolPermit { permit })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PoolError::Saturated,
                mpsc::error::TrySendError::Closed(_) => PoolError::ShutDown,
            })
    }

    /// Tasks currently running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting work, run what is already queued, and wait for
    /// in-flight tasks up to the drain timeout.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker pool dispatcher ended abnormally");
            }
        }

        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!(count = pending, "Waiting for background jobs to finish");
        }
        if tokio::time::timeout(self.config.drain_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.tracker.len(),
                "Background jobs still running after drain timeout"
            );
        }
        info!("Worker pool stopped");
    }
}

async fn dispatch(
    mut receiver: mpsc::Receiver<Task>,
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
) {
    loop {
        let task = tokio::select! {
            _ = shutdown.cancelled() => break,
            task = receiver.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };
        run(task, &semaphore, &tracker).await;
    }

    // Queued tasks belong to jobs that already moved to Processing.
    receiver.close();
    let mut drained = 0usize;
    while let Some(task) = receiver.recv().await {
        run(task, &semaphore, &tracker).await;
        drained += 1;
    }
    if drained > 0 {
        debug!(count = drained, "Dispatched queued tasks during shutdown");
    }
}

async fn run(task: Task, semaphore: &Arc<Semaphore>, tracker: &TaskTracker) {
    let Ok(permit) = semaphore.clone().acquire_owned().await else {
        return;
    };
    tracker.spawn(async move {
        task.await;
        drop(permit);
    });
}
