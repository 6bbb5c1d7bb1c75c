//! Priority job queue with retry, backoff, expiry and completion callbacks.
//!
//! Dispatch is at-least-once: a handler that returns a retryable error has
//! its job put back with a capped exponential backoff until the retry limit
//! is reached. Completion handlers see every terminal outcome exactly once.
//!
//! ```text
//! push_job ──► pending (priority desc, FIFO) ──► worker ──► handler
//!                    ▲                                        │
//!                    └──── retry (backoff) ◄── Err(retryable) ┤
//!                                                             ▼
//!                                     on_complete(Completed | Failed | Expired)
//! ```

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::WatcherError;
use crate::job::{Job, JobOutcome, JobPayload, JobStatus, QUEUE_BLOCK_PROCESSING, QUEUE_EVENT_PROCESSING};
use crate::retry::JobBackoff;

/// Processes jobs from one queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Handle one job. Returning a retryable error requeues it.
    async fn handle(&self, job: &Job, queue: &JobQueue) -> Result<(), WatcherError>;
}

/// Observes terminal job outcomes on one queue.
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn on_complete(&self, outcome: &JobOutcome, queue: &JobQueue) -> Result<(), WatcherError>;
}

/// What happened to a dispatched job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Completed,
    Retried,
    Failed,
    Expired,
}

type PendingKey = (Reverse<i32>, u64);

#[derive(Default)]
struct QueueState {
    next_id: u64,
    next_seq: u64,
    pending: HashMap<String, BTreeMap<PendingKey, Job>>,
}

struct Shared {
    config: QueueConfig,
    backoff: JobBackoff,
    state: Mutex<QueueState>,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    completions: RwLock<HashMap<String, Vec<Arc<dyn CompletionHandler>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    notify: Notify,
    running: AtomicBool,
}

/// In-process job queue shared by all pipeline components.
///
/// Cheap to clone; clones share the same pending jobs and handlers.
#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<Shared>,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        let backoff = JobBackoff::from_config(&config);
        Self {
            shared: Arc::new(Shared {
                config,
                backoff,
                state: Mutex::new(QueueState::default()),
                handlers: RwLock::new(HashMap::new()),
                completions: RwLock::new(HashMap::new()),
                workers: Mutex::new(Vec::new()),
                notify: Notify::new(),
                running: AtomicBool::new(false),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn workers for every subscribed queue.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let queues: Vec<String> = self.subscribed_queues();
        for queue in queues {
            self.spawn_workers(&queue);
        }
        info!("job queue started");
    }

    /// Signal workers to stop and wait for in-flight jobs to finish.
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.notify.notify_waiters();
        let workers: Vec<JoinHandle<()>> = self
            .shared
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "queue worker ended abnormally");
            }
        }
        info!("job queue stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Register the handler for `queue`. Replaces any previous handler.
    pub fn subscribe(&self, queue: &str, handler: Arc<dyn JobHandler>) {
        let previous = self
            .shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(queue.to_string(), handler);
        if previous.is_none() && self.is_running() {
            self.spawn_workers(queue);
        }
    }

    /// Register a completion handler for `queue`.
    pub fn on_complete(&self, queue: &str, handler: Arc<dyn CompletionHandler>) {
        self.shared
            .completions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(queue.to_string())
            .or_default()
            .push(handler);
    }

    /// Enqueue a job. Higher `priority` dequeues first.
    pub fn push_job(&self, queue: &str, payload: JobPayload, priority: i32) -> Result<u64, WatcherError> {
        let id = {
            let mut state = self.state();
            state.next_id += 1;
            let job = Job::new(state.next_id, queue, payload, priority)?;
            let id = job.id;
            Self::insert(&mut state, job);
            id
        };
        debug!(queue, job_id = id, priority, "job pushed");
        self.shared.notify.notify_waiters();
        Ok(id)
    }

    /// Enqueue a job unless an identical payload is already waiting on `queue`.
    ///
    /// A waiting duplicate with a lower priority is escalated to `priority`.
    /// Returns the id of the new job, or `None` if a duplicate was found.
    pub fn push_unique(
        &self,
        queue: &str,
        payload: JobPayload,
        priority: i32,
    ) -> Result<Option<u64>, WatcherError> {
        {
            let mut state = self.state();
            let existing = state.pending.get(queue).and_then(|jobs| {
                jobs.iter()
                    .find(|(_, job)| job.payload == payload)
                    .map(|(key, job)| (*key, job.priority))
            });
            if let Some((key, current)) = existing {
                if current < priority {
                    let job = state.pending.get_mut(queue).and_then(|jobs| jobs.remove(&key));
                    if let Some(mut job) = job {
                        job.priority = priority;
                        Self::insert(&mut state, job);
                    }
                }
                debug!(queue, kind = payload.kind(), priority, "duplicate job already pending");
                return Ok(None);
            }
        }
        self.push_job(queue, payload, priority).map(Some)
    }

    /// Report `job` as successfully completed to the completion handlers.
    pub async fn mark_complete(&self, job: &Job) {
        self.finish(JobOutcome {
            job: job.clone(),
            status: JobStatus::Completed,
            error: None,
        })
        .await;
    }

    /// Number of jobs waiting on `queue`, including those in backoff.
    pub fn pending_count(&self, queue: &str) -> usize {
        self.state().pending.get(queue).map_or(0, BTreeMap::len)
    }

    /// Snapshot of the jobs waiting on `queue`, in dispatch order.
    pub fn pending_jobs(&self, queue: &str) -> Vec<Job> {
        self.state()
            .pending
            .get(queue)
            .map(|jobs| jobs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Dispatch the highest-priority ready job of `queue`, if any.
    pub async fn process_next(&self, queue: &str) -> Option<Dispatched> {
        let handler = self
            .shared
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(queue)
            .cloned()?;
        let job = self.take_ready(queue)?;
        Some(self.run(job, handler).await)
    }

    /// Drive every subscribed queue on the calling task until no job is ready.
    ///
    /// Returns the number of dispatches.
    pub async fn run_until_idle(&self) -> usize {
        let queues = self.subscribed_queues();
        let mut dispatched = 0;
        loop {
            let mut progressed = false;
            for queue in &queues {
                if self.process_next(queue).await.is_some() {
                    dispatched += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return dispatched;
            }
        }
    }

    fn subscribed_queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = self
            .shared
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        queues.sort();
        queues
    }

    fn concurrency(&self, queue: &str) -> usize {
        match queue {
            QUEUE_BLOCK_PROCESSING => self.shared.config.block_concurrency,
            QUEUE_EVENT_PROCESSING => self.shared.config.event_concurrency,
            _ => 1,
        }
        .max(1)
    }

    fn spawn_workers(&self, queue: &str) {
        let count = self.concurrency(queue);
        let mut workers = self.shared.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for worker in 0..count {
            let this = self.clone();
            let queue = queue.to_string();
            workers.push(tokio::spawn(async move {
                debug!(queue = %queue, worker, "queue worker started");
                this.worker_loop(&queue).await;
            }));
        }
    }

    async fn worker_loop(&self, queue: &str) {
        let poll_interval = self.shared.config.poll_interval();
        while self.is_running() {
            if self.process_next(queue).await.is_none() {
                tokio::select! {
                    _ = self.shared.notify.notified() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }

    fn insert(state: &mut QueueState, job: Job) {
        state.next_seq += 1;
        let key = (Reverse(job.priority), state.next_seq);
        state.pending.entry(job.queue.clone()).or_default().insert(key, job);
    }

    fn take_ready(&self, queue: &str) -> Option<Job> {
        let now = Instant::now();
        let mut state = self.state();
        let jobs = state.pending.get_mut(queue)?;
        let key = jobs
            .iter()
            .find(|(_, job)| job.is_ready(now))
            .map(|(key, _)| *key)?;
        jobs.remove(&key)
    }

    async fn run(&self, mut job: Job, handler: Arc<dyn JobHandler>) -> Dispatched {
        let expire_after = self.shared.config.expire_after();
        if job.age() > expire_after {
            let err = WatcherError::JobExpired {
                job_id: job.id,
                age_secs: job.age().as_secs(),
            };
            error!(queue = %job.queue, job_id = job.id, kind = job.payload.kind(), "{err}");
            self.finish(JobOutcome {
                job,
                status: JobStatus::Expired,
                error: Some(err.to_string()),
            })
            .await;
            return Dispatched::Expired;
        }

        match handler.handle(&job, self).await {
            Ok(()) => {
                debug!(queue = %job.queue, job_id = job.id, kind = job.payload.kind(), "job completed");
                self.mark_complete(&job).await;
                Dispatched::Completed
            }
            Err(err) => {
                job.attempt += 1;
                if let Some(delay) = self.shared.backoff.retry_after(&job, &err) {
                    debug!(
                        queue = %job.queue,
                        job_id = job.id,
                        attempt = job.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "job aborted, retrying"
                    );
                    job.not_before = Instant::now() + delay;
                    Self::insert(&mut self.state(), job);
                    return Dispatched::Retried;
                }
                error!(
                    queue = %job.queue,
                    job_id = job.id,
                    kind = job.payload.kind(),
                    attempt = job.attempt,
                    error = %err,
                    "job failed"
                );
                self.finish(JobOutcome {
                    job,
                    status: JobStatus::Failed,
                    error: Some(err.to_string()),
                })
                .await;
                Dispatched::Failed
            }
        }
    }

    async fn finish(&self, outcome: JobOutcome) {
        let handlers: Vec<Arc<dyn CompletionHandler>> = self
            .shared
            .completions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&outcome.job.queue)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            if let Err(e) = handler.on_complete(&outcome, self).await {
                warn!(queue = %outcome.job.queue, job_id = outcome.job.id, error = %e, "completion handler failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    use crate::types::BlockHeader;

    fn fast_config() -> QueueConfig {
        QueueConfig {
            retry_limit: 2,
            retry_initial_backoff_ms: 0,
            retry_max_backoff_ms: 0,
            poll_interval_ms: 5,
            ..QueueConfig::default()
        }
    }

    fn index_payload(number: u64) -> JobPayload {
        JobPayload::index(&BlockHeader {
            hash: format!("0x{number}"),
            number,
            parent_hash: format!("0x{}", number.saturating_sub(1)),
            timestamp: 0,
        })
    }

    fn block_number(job: &Job) -> u64 {
        match &job.payload {
            JobPayload::Index(block) => block.block_number,
            _ => u64::MAX,
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl JobHandler for Recorder {
        async fn handle(&self, job: &Job, _queue: &JobQueue) -> Result<(), WatcherError> {
            self.seen.lock().unwrap().push(block_number(job));
            Ok(())
        }
    }

    struct AlwaysFails {
        calls: AtomicU32,
        retryable: bool,
    }

    #[async_trait]
    impl JobHandler for AlwaysFails {
        async fn handle(&self, _job: &Job, _queue: &JobQueue) -> Result<(), WatcherError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.retryable {
                Err(WatcherError::UpstreamUnavailable("down".into()))
            } else {
                Err(WatcherError::Corruption("bad".into()))
            }
        }
    }

    #[derive(Default)]
    struct Outcomes(Mutex<Vec<(JobStatus, bool)>>);

    #[async_trait]
    impl CompletionHandler for Outcomes {
        async fn on_complete(&self, outcome: &JobOutcome, _queue: &JobQueue) -> Result<(), WatcherError> {
            self.0.lock().unwrap().push((outcome.status, outcome.failed()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn higher_priority_dequeues_first() {
        let queue = JobQueue::new(fast_config());
        let recorder = Arc::new(Recorder::default());
        queue.subscribe(QUEUE_BLOCK_PROCESSING, recorder.clone());

        queue.push_job(QUEUE_BLOCK_PROCESSING, index_payload(1), 0).unwrap();
        queue.push_job(QUEUE_BLOCK_PROCESSING, index_payload(2), 0).unwrap();
        queue.push_job(QUEUE_BLOCK_PROCESSING, index_payload(3), 5).unwrap();

        assert_eq!(queue.run_until_idle().await, 3);
        assert_eq!(*recorder.seen.lock().unwrap(), vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn push_unique_escalates_pending_duplicate() {
        let queue = JobQueue::new(fast_config());
        let recorder = Arc::new(Recorder::default());
        queue.subscribe(QUEUE_BLOCK_PROCESSING, recorder.clone());

        queue.push_job(QUEUE_BLOCK_PROCESSING, index_payload(1), 0).unwrap();
        queue.push_job(QUEUE_BLOCK_PROCESSING, index_payload(2), 0).unwrap();
        let pushed = queue.push_unique(QUEUE_BLOCK_PROCESSING, index_payload(2), 1).unwrap();

        assert!(pushed.is_none());
        assert_eq!(queue.pending_count(QUEUE_BLOCK_PROCESSING), 2);
        queue.run_until_idle().await;
        assert_eq!(*recorder.seen.lock().unwrap(), vec![2, 1]);
    }

    #[tokio::test]
    async fn retryable_failure_retries_until_limit() {
        let queue = JobQueue::new(fast_config());
        let handler = Arc::new(AlwaysFails {
            calls: AtomicU32::new(0),
            retryable: true,
        });
        let outcomes = Arc::new(Outcomes::default());
        queue.subscribe(QUEUE_BLOCK_PROCESSING, handler.clone());
        queue.on_complete(QUEUE_BLOCK_PROCESSING, outcomes.clone());

        queue.push_job(QUEUE_BLOCK_PROCESSING, index_payload(1), 0).unwrap();
        queue.run_until_idle().await;

        // first try + 2 retries
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(*outcomes.0.lock().unwrap(), vec![(JobStatus::Failed, true)]);
        assert_eq!(queue.pending_count(QUEUE_BLOCK_PROCESSING), 0);
    }

    #[tokio::test]
    async fn terminal_failure_is_not_retried() {
        let queue = JobQueue::new(fast_config());
        let handler = Arc::new(AlwaysFails {
            calls: AtomicU32::new(0),
            retryable: false,
        });
        queue.subscribe(QUEUE_BLOCK_PROCESSING, handler.clone());

        queue.push_job(QUEUE_BLOCK_PROCESSING, index_payload(1), 0).unwrap();
        queue.run_until_idle().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backoff_holds_job_until_ready() {
        let config = QueueConfig {
            retry_initial_backoff_ms: 60_000,
            retry_max_backoff_ms: 60_000,
            ..fast_config()
        };
        let queue = JobQueue::new(config);
        let handler = Arc::new(AlwaysFails {
            calls: AtomicU32::new(0),
            retryable: true,
        });
        queue.subscribe(QUEUE_BLOCK_PROCESSING, handler.clone());
        queue.push_job(QUEUE_BLOCK_PROCESSING, index_payload(1), 0).unwrap();

        assert_eq!(queue.process_next(QUEUE_BLOCK_PROCESSING).await, Some(Dispatched::Retried));
        assert_eq!(queue.process_next(QUEUE_BLOCK_PROCESSING).await, None);
        assert_eq!(queue.pending_count(QUEUE_BLOCK_PROCESSING), 1);
        assert_eq!(queue.pending_jobs(QUEUE_BLOCK_PROCESSING)[0].attempt, 1);
    }

    #[tokio::test]
    async fn expired_job_reported_failed() {
        let config = QueueConfig {
            expire_after_secs: 0,
            ..fast_config()
        };
        let queue = JobQueue::new(config);
        let recorder = Arc::new(Recorder::default());
        let outcomes = Arc::new(Outcomes::default());
        queue.subscribe(QUEUE_BLOCK_PROCESSING, recorder.clone());
        queue.on_complete(QUEUE_BLOCK_PROCESSING, outcomes.clone());

        queue.push_job(QUEUE_BLOCK_PROCESSING, index_payload(1), 0).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert_eq!(queue.process_next(QUEUE_BLOCK_PROCESSING).await, Some(Dispatched::Expired));
        assert!(recorder.seen.lock().unwrap().is_empty());
        assert_eq!(*outcomes.0.lock().unwrap(), vec![(JobStatus::Expired, true)]);
    }

    #[tokio::test]
    async fn workers_drain_queue_in_background() {
        let queue = JobQueue::new(fast_config());
        let recorder = Arc::new(Recorder::default());
        queue.subscribe(QUEUE_BLOCK_PROCESSING, recorder.clone());
        queue.start();

        for n in 0..5 {
            queue.push_job(QUEUE_BLOCK_PROCESSING, index_payload(n), 0).unwrap();
        }
        for _ in 0..200 {
            if recorder.seen.lock().unwrap().len() == 5 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        queue.stop().await;

        assert_eq!(recorder.seen.lock().unwrap().len(), 5);
        assert!(!queue.is_running());
    }
}
