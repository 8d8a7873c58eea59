//! # Render scheduler
//!
//! Coalesces render requests into at most one running job. Requests are tagged with a
//! [`Priority`], and only the most recent request of each priority is worth running: anything
//! older is stale and gets pruned without ever starting.
//!
//! A [`Priority::Finish`] request is authoritative. It cancels a running preview, and prunes
//! any pending preview and anything requested before it. Previews get a grace period of a few
//! frames to finish before they are cancelled regardless, so a slow preview never holds up the
//! queue for long.
//!
//! Cancellation is cooperative. Jobs get a [`CancellationToken`] and are expected to return
//! promptly once it fires, the scheduler never aborts a job itself.

use inkstack_core::FuzzID;
use std::{future::Future, pin::Pin, sync::Arc, time::Duration};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    strum::AsRefStr,
    strum::EnumIter,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(u8)]
pub enum Priority {
    /// Speculative background work.
    IdleQueue = 1,
    /// Live feedback during an interaction.
    Preview = 5,
    /// The authoritative render, must complete.
    Finish = 10,
}
impl Priority {
    #[must_use]
    pub fn weight(self) -> u8 {
        self as u8
    }
}

pub type JobID = FuzzID<JobHandle>;

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum JobOutcome {
    Completed,
    /// The job returned an error or panicked, with the formatted error.
    Failed(String),
    /// Cancelled while running (or before it started) and has since settled.
    Cancelled,
    /// Superseded before it ever started.
    Pruned,
}

#[derive(Clone, Debug)]
pub enum SchedulerEvent {
    Started { id: JobID, priority: Priority },
    Pruned { id: JobID, priority: Priority },
    /// A preview ran out of time and was cancelled.
    GraceExpired { id: JobID },
    Completed {
        id: JobID,
        priority: Priority,
        outcome: JobOutcome,
    },
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("render scheduler is closed")]
    Closed,
}

#[derive(Clone, Copy, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Length of a display frame, in milliseconds.
    pub frame_interval_ms: f64,
    /// How many frames a preview may run before it's cancelled.
    pub grace_frames: u32,
    /// Buffered [`SchedulerEvent`]s per subscriber before the slowest start missing some.
    pub event_capacity: usize,
}
impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 1000.0 / 60.0,
            grace_frames: 5,
            event_capacity: 64,
        }
    }
}
impl SchedulerConfig {
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        // Negative or NaN from a hand-edited config is treated as zero.
        Duration::from_secs_f64((self.frame_interval_ms / 1000.0).max(0.0))
    }
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.frame_interval() * self.grace_frames
    }
}

/// What a render job runs.
pub type RenderFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type RenderFn = Box<dyn FnOnce(CancellationToken) -> RenderFuture + Send>;

/// Handle to an enqueued job.
pub struct JobHandle {
    id: JobID,
    priority: Priority,
    token: CancellationToken,
    outcome: oneshot::Receiver<JobOutcome>,
}
impl JobHandle {
    #[must_use]
    pub fn id(&self) -> JobID {
        self.id
    }
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }
    /// Ask the job to stop. If it hasn't started, it never will.
    pub fn cancel(&self) {
        self.token.cancel();
    }
    /// Wait for the job to settle.
    pub async fn outcome(self) -> JobOutcome {
        // Sender only dropped without sending if the runtime went away under it.
        self.outcome.await.unwrap_or(JobOutcome::Cancelled)
    }
}

struct Entry {
    id: JobID,
    priority: Priority,
    render: RenderFn,
    token: CancellationToken,
    enqueued: tokio::time::Instant,
    outcome: oneshot::Sender<JobOutcome>,
}

struct Active {
    id: JobID,
    priority: Priority,
    token: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    /// In enqueue order. After scheduling, at most one per priority.
    pending: Vec<Entry>,
    active: Option<Active>,
    closed: bool,
}

struct Shared {
    state: parking_lot::Mutex<QueueState>,
    events: broadcast::Sender<SchedulerEvent>,
    config: SchedulerConfig,
    runtime: tokio::runtime::Handle,
}

/// Cheap to clone, clones share one queue.
#[derive(Clone)]
pub struct RenderScheduler {
    shared: Arc<Shared>,
}
impl RenderScheduler {
    /// Jobs are run as tasks on `runtime`.
    #[must_use]
    pub fn new(config: SchedulerConfig, runtime: tokio::runtime::Handle) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                state: parking_lot::Mutex::new(QueueState::default()),
                events,
                config,
                runtime,
            }),
        }
    }
    /// Request a render. Returns immediately, the job runs once it wins scheduling.
    pub fn enqueue<F, Fut>(&self, priority: Priority, render: F) -> Result<JobHandle, SchedulerError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = JobID::default();
        let token = CancellationToken::new();
        let (send, recv) = oneshot::channel();
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                // Whatever was running belongs to a scheduler that's gone.
                state.active = None;
                return Err(SchedulerError::Closed);
            }
            state.pending.push(Entry {
                id,
                priority,
                render: Box::new(move |token| -> RenderFuture { Box::pin(render(token)) }),
                token: token.clone(),
                enqueued: tokio::time::Instant::now(),
                outcome: send,
            });
        }
        log::trace!("enqueued {} job {id}", priority.as_ref());
        self.shared.schedule();
        Ok(JobHandle {
            id,
            priority,
            token,
            outcome: recv,
        })
    }
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.shared.events.subscribe()
    }
    /// The running job, if any.
    #[must_use]
    pub fn active(&self) -> Option<(JobID, Priority)> {
        self.shared
            .state
            .lock()
            .active
            .as_ref()
            .map(|active| (active.id, active.priority))
    }
    /// Jobs waiting to start.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
    /// Cancel the running job and every pending one. Later enqueues fail.
    pub fn close(&self) {
        let pending = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            if let Some(active) = &state.active {
                active.token.cancel();
            }
            std::mem::take(&mut state.pending)
        };
        log::debug!("render scheduler closed, dropping {} pending", pending.len());
        for entry in pending {
            entry.token.cancel();
            self.shared.emit(SchedulerEvent::Pruned {
                id: entry.id,
                priority: entry.priority,
            });
            let _ = entry.outcome.send(JobOutcome::Cancelled);
        }
    }
}

impl Shared {
    fn emit(&self, event: SchedulerEvent) {
        // Err just means nobody is listening.
        let _ = self.events.send(event);
    }
    /// Prune stale entries, preempt a running preview if a finish is waiting, and start the
    /// next job if idle.
    fn schedule(self: &Arc<Self>) {
        loop {
            let (pruned, next) = {
                let mut state = self.state.lock();
                if state.closed {
                    return;
                }
                let (pruned, finish) = state.prune();
                if finish {
                    if let Some(active) = &state.active {
                        if active.priority == Priority::Preview && !active.token.is_cancelled() {
                            log::debug!("finish job preempts running preview {}", active.id);
                            active.token.cancel();
                        }
                    }
                }
                let next = if state.active.is_none() {
                    state.take_next()
                } else {
                    None
                };
                if let Some(next) = &next {
                    if !next.token.is_cancelled() {
                        state.active = Some(Active {
                            id: next.id,
                            priority: next.priority,
                            token: next.token.clone(),
                        });
                    }
                }
                (pruned, next)
            };

            for entry in pruned {
                log::debug!(
                    "pruned stale {} job {} after {:?}",
                    entry.priority.as_ref(),
                    entry.id,
                    entry.enqueued.elapsed()
                );
                entry.token.cancel();
                self.emit(SchedulerEvent::Pruned {
                    id: entry.id,
                    priority: entry.priority,
                });
                let _ = entry.outcome.send(JobOutcome::Pruned);
            }
            let Some(next) = next else {
                return;
            };
            if next.token.is_cancelled() {
                // Cancelled through its handle before it got to run.
                self.emit(SchedulerEvent::Completed {
                    id: next.id,
                    priority: next.priority,
                    outcome: JobOutcome::Cancelled,
                });
                let _ = next.outcome.send(JobOutcome::Cancelled);
                continue;
            }
            self.start(next);
            return;
        }
    }
    fn start(self: &Arc<Self>, entry: Entry) {
        let Entry {
            id,
            priority,
            render,
            token,
            enqueued,
            outcome,
        } = entry;
        log::debug!(
            "starting {} job {id}, waited {:?}",
            priority.as_ref(),
            enqueued.elapsed()
        );
        self.emit(SchedulerEvent::Started { id, priority });

        let shared = self.clone();
        let grace = self.config.grace_period();
        self.runtime.spawn(async move {
            // Run as its own task, so a panic is caught by the join. That includes panics from
            // the closure itself, before it has made a future.
            let job_token = token.clone();
            let mut job = shared.runtime.spawn(async move { render(job_token).await });
            let timer = tokio::time::sleep(grace);
            tokio::pin!(timer);
            let mut armed = true;
            let joined = loop {
                tokio::select! {
                    joined = &mut job => break joined,
                    () = &mut timer, if armed => {
                        armed = false;
                        shared.grace_expired(id);
                    }
                }
            };
            let result = match joined {
                Ok(Ok(())) if token.is_cancelled() => JobOutcome::Cancelled,
                Ok(Ok(())) => JobOutcome::Completed,
                Ok(Err(_)) if token.is_cancelled() => JobOutcome::Cancelled,
                Ok(Err(err)) => {
                    log::warn!("{} job {id} failed: {err:#}", priority.as_ref());
                    JobOutcome::Failed(format!("{err:#}"))
                }
                Err(join) => {
                    log::error!("{} job {id} panicked: {join}", priority.as_ref());
                    JobOutcome::Failed(join.to_string())
                }
            };
            shared.settle(id, priority, result, outcome);
        });
    }
    fn grace_expired(&self, id: JobID) {
        let state = self.state.lock();
        let Some(active) = &state.active else {
            return;
        };
        if active.id == id && active.priority == Priority::Preview && !active.token.is_cancelled() {
            log::debug!("preview {id} out of time, cancelling");
            active.token.cancel();
            drop(state);
            self.emit(SchedulerEvent::GraceExpired { id });
        }
    }
    fn settle(
        self: &Arc<Self>,
        id: JobID,
        priority: Priority,
        outcome: JobOutcome,
        send: oneshot::Sender<JobOutcome>,
    ) {
        {
            let mut state = self.state.lock();
            if state.active.as_ref().is_some_and(|active| active.id == id) {
                state.active = None;
            }
        }
        self.emit(SchedulerEvent::Completed {
            id,
            priority,
            outcome: outcome.clone(),
        });
        let _ = send.send(outcome);
        self.schedule();
    }
}

impl QueueState {
    /// Remove every pending entry that lost to a newer one. Returns the removed entries, and
    /// whether a finish job is waiting.
    fn prune(&mut self) -> (Vec<Entry>, bool) {
        use strum::IntoEnumIterator;
        let latest = |priority: Priority| {
            self.pending
                .iter()
                .rev()
                .find(|entry| entry.priority == priority)
                .map(|entry| entry.id)
        };
        let finish = latest(Priority::Finish);
        let keep: smallvec::SmallVec<[JobID; 3]> = Priority::iter()
            .filter_map(|priority| latest(priority).map(|id| (priority, id)))
            .filter(|&(priority, id)| match finish {
                // A finish supersedes every preview, and anything older than itself.
                Some(finish) => priority != Priority::Preview && id >= finish,
                None => true,
            })
            .map(|(_, id)| id)
            .collect();
        let (kept, pruned): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|entry| keep.contains(&entry.id));
        self.pending = kept;
        (pruned, finish.is_some())
    }
    /// Take the most urgent pending entry.
    fn take_next(&mut self) -> Option<Entry> {
        let idx = self
            .pending
            .iter()
            .enumerate()
            .max_by_key(|(_, entry)| entry.priority)
            .map(|(idx, _)| idx)?;
        Some(self.pending.remove(idx))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::Instant;

    fn scheduler() -> RenderScheduler {
        RenderScheduler::new(SchedulerConfig::default(), tokio::runtime::Handle::current())
    }
    /// Runs until cancelled.
    fn until_cancelled(token: CancellationToken) -> impl Future<Output = anyhow::Result<()>> {
        async move {
            token.cancelled().await;
            anyhow::Ok(())
        }
    }
    /// Runs until `release` is sent (or dropped).
    fn blocker() -> (
        oneshot::Sender<()>,
        impl FnOnce(CancellationToken) -> RenderFuture + Send + 'static,
    ) {
        let (send, recv) = oneshot::channel::<()>();
        let job = move |_token: CancellationToken| -> RenderFuture {
            Box::pin(async move {
                let _ = recv.await;
                anyhow::Ok(())
            })
        };
        (send, job)
    }

    #[test]
    fn priority_weights() {
        assert_eq!(Priority::IdleQueue.weight(), 1);
        assert_eq!(Priority::Preview.weight(), 5);
        assert_eq!(Priority::Finish.weight(), 10);
        assert!(Priority::Finish > Priority::Preview);
        let grace = SchedulerConfig::default().grace_period();
        assert!(grace > Duration::from_millis(83) && grace < Duration::from_millis(84));
    }
    #[tokio::test(start_paused = true)]
    async fn finish_preempts_preview() {
        let scheduler = scheduler();
        let start = Instant::now();
        let preview = scheduler
            .enqueue(Priority::Preview, until_cancelled)
            .unwrap();
        assert_eq!(scheduler.active(), Some((preview.id(), Priority::Preview)));

        let finish = scheduler
            .enqueue(Priority::Finish, |_| async { anyhow::Ok(()) })
            .unwrap();
        assert_eq!(preview.outcome().await, JobOutcome::Cancelled);
        assert_eq!(finish.outcome().await, JobOutcome::Completed);
        // Preempted right away, not after the grace period.
        assert!(start.elapsed() < SchedulerConfig::default().grace_period());
    }
    #[tokio::test(start_paused = true)]
    async fn preview_grace_timeout() {
        let scheduler = scheduler();
        let mut events = scheduler.subscribe();
        let start = Instant::now();
        let preview = scheduler
            .enqueue(Priority::Preview, until_cancelled)
            .unwrap();
        let id = preview.id();
        assert_eq!(preview.outcome().await, JobOutcome::Cancelled);
        let elapsed = start.elapsed();
        let grace = SchedulerConfig::default().grace_period();
        assert!(elapsed >= grace && elapsed < grace + Duration::from_millis(5));

        let mut saw_expiry = false;
        while let Ok(event) = events.try_recv() {
            if let SchedulerEvent::GraceExpired { id: expired } = event {
                assert_eq!(expired, id);
                saw_expiry = true;
            }
        }
        assert!(saw_expiry);
    }
    #[tokio::test(start_paused = true)]
    async fn finish_outlives_grace() {
        let scheduler = scheduler();
        let finish = scheduler
            .enqueue(Priority::Finish, |token| async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                anyhow::ensure!(!token.is_cancelled(), "cancelled");
                Ok(())
            })
            .unwrap();
        assert_eq!(finish.outcome().await, JobOutcome::Completed);
    }
    #[tokio::test(start_paused = true)]
    async fn stale_same_priority_pruned() {
        let scheduler = scheduler();
        let (release, job) = blocker();
        let running = scheduler.enqueue(Priority::Finish, job).unwrap();

        let older = scheduler
            .enqueue(Priority::IdleQueue, |_| async { anyhow::Ok(()) })
            .unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let newer = {
            let ran = ran.clone();
            scheduler
                .enqueue(Priority::IdleQueue, move |_| async move {
                    ran.store(true, Ordering::Relaxed);
                    anyhow::Ok(())
                })
                .unwrap()
        };
        assert_eq!(scheduler.pending_len(), 1);
        assert_eq!(older.outcome().await, JobOutcome::Pruned);

        release.send(()).unwrap();
        assert_eq!(running.outcome().await, JobOutcome::Completed);
        assert_eq!(newer.outcome().await, JobOutcome::Completed);
        assert!(ran.load(Ordering::Relaxed));
    }
    #[tokio::test(start_paused = true)]
    async fn finish_prunes_preview_and_older() {
        let scheduler = scheduler();
        let (release, job) = blocker();
        let running = scheduler.enqueue(Priority::Finish, job).unwrap();

        let old_idle = scheduler
            .enqueue(Priority::IdleQueue, |_| async { anyhow::Ok(()) })
            .unwrap();
        let preview = scheduler
            .enqueue(Priority::Preview, |_| async { anyhow::Ok(()) })
            .unwrap();
        let finish = scheduler
            .enqueue(Priority::Finish, |_| async { anyhow::Ok(()) })
            .unwrap();
        let new_idle = scheduler
            .enqueue(Priority::IdleQueue, |_| async { anyhow::Ok(()) })
            .unwrap();
        // A preview after the finish is still superseded by it.
        let late_preview = scheduler
            .enqueue(Priority::Preview, |_| async { anyhow::Ok(()) })
            .unwrap();

        assert_eq!(old_idle.outcome().await, JobOutcome::Pruned);
        assert_eq!(preview.outcome().await, JobOutcome::Pruned);
        assert_eq!(late_preview.outcome().await, JobOutcome::Pruned);
        assert_eq!(scheduler.pending_len(), 2);

        release.send(()).unwrap();
        assert_eq!(running.outcome().await, JobOutcome::Completed);
        assert_eq!(finish.outcome().await, JobOutcome::Completed);
        assert_eq!(new_idle.outcome().await, JobOutcome::Completed);
        assert_eq!(scheduler.active(), None);
    }
    #[tokio::test(start_paused = true)]
    async fn failures_dont_halt() {
        let scheduler = scheduler();
        let failing = scheduler
            .enqueue(Priority::Finish, |_| async {
                Err::<(), _>(anyhow::anyhow!("out of video memory"))
            })
            .unwrap();
        assert_eq!(
            failing.outcome().await,
            JobOutcome::Failed("out of video memory".to_owned())
        );

        let panicking = scheduler
            .enqueue(Priority::Finish, |_| async {
                if true {
                    panic!("renderer bug");
                }
                anyhow::Ok(())
            })
            .unwrap();
        assert!(matches!(panicking.outcome().await, JobOutcome::Failed(_)));

        // Panics before it even makes a future.
        let eager_panic = scheduler
            .enqueue(Priority::Finish, |_| -> RenderFuture {
                panic!("closure bug")
            })
            .unwrap();
        assert!(matches!(eager_panic.outcome().await, JobOutcome::Failed(_)));
        assert_eq!(scheduler.active(), None);

        let next = scheduler
            .enqueue(Priority::IdleQueue, |_| async { anyhow::Ok(()) })
            .unwrap();
        assert_eq!(next.outcome().await, JobOutcome::Completed);
    }
    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start() {
        let scheduler = scheduler();
        let (release, job) = blocker();
        let running = scheduler.enqueue(Priority::Finish, job).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let waiting = {
            let ran = ran.clone();
            scheduler
                .enqueue(Priority::IdleQueue, move |_| async move {
                    ran.store(true, Ordering::Relaxed);
                    anyhow::Ok(())
                })
                .unwrap()
        };
        waiting.cancel();
        release.send(()).unwrap();
        assert_eq!(running.outcome().await, JobOutcome::Completed);
        assert_eq!(waiting.outcome().await, JobOutcome::Cancelled);
        assert!(!ran.load(Ordering::Relaxed));
    }
    #[tokio::test(start_paused = true)]
    async fn close_cancels_everything() {
        let scheduler = scheduler();
        let active = scheduler
            .enqueue(Priority::Finish, until_cancelled)
            .unwrap();
        let pending = scheduler
            .enqueue(Priority::IdleQueue, |_| async { anyhow::Ok(()) })
            .unwrap();
        scheduler.close();
        assert!(scheduler.is_closed());
        assert_eq!(pending.outcome().await, JobOutcome::Cancelled);
        assert_eq!(active.outcome().await, JobOutcome::Cancelled);
        assert!(matches!(
            scheduler.enqueue(Priority::Finish, |_| async { anyhow::Ok(()) }),
            Err(SchedulerError::Closed)
        ));
        assert_eq!(scheduler.active(), None);
    }
}
