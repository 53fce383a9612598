//! Single-threaded capture worker.
//!
//! All device and buffer state lives on one named thread. Other threads talk
//! to it by posting tasks; tasks run one at a time in due-time order, FIFO
//! among tasks due at the same instant. Posting is refused once the worker is
//! marked not-running, and every accepted task carries the worker's
//! cancellation token so a running task can purge everything still pending.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, warn};

use crate::traits::{CaptureError, Result};

/// Work item executed on the worker thread against its state.
pub type Task<S> = Box<dyn FnOnce(&mut S, &mut Scheduler<S>) + Send>;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Tag attached to accepted tasks so they can be purged together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CancellationToken(u64);

impl CancellationToken {
    fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

struct Job<S> {
    due: Instant,
    seq: u64,
    token: CancellationToken,
    task: Task<S>,
}

// Min-heap on (due, seq).
impl<S> Ord for Job<S> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<S> PartialOrd for Job<S> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<S> PartialEq for Job<S> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<S> Eq for Job<S> {}

enum Message<S> {
    Job(Job<S>),
    Shutdown,
}

/// Pending-task queue owned by the worker thread.
///
/// Handed to every task so it can purge work queued behind it.
pub struct Scheduler<S> {
    rx: Receiver<Message<S>>,
    pending: BinaryHeap<Job<S>>,
    shutdown: bool,
}

impl<S> Scheduler<S> {
    fn new(rx: Receiver<Message<S>>) -> Self {
        Self {
            rx,
            pending: BinaryHeap::new(),
            shutdown: false,
        }
    }

    fn drain_channel(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            self.accept(message);
        }
    }

    fn accept(&mut self, message: Message<S>) {
        match message {
            Message::Job(job) => self.pending.push(job),
            Message::Shutdown => self.shutdown = true,
        }
    }

    fn pop_due(&mut self, now: Instant) -> Option<Job<S>> {
        if self.pending.peek().is_some_and(|job| job.due <= now) {
            self.pending.pop()
        } else {
            None
        }
    }

    /// Remove every not-yet-run task tagged with `token`, including tasks
    /// still in flight on the channel. Returns how many were removed.
    pub fn remove_tasks(&mut self, token: CancellationToken) -> usize {
        self.drain_channel();
        let before = self.pending.len();
        self.pending.retain(|job| job.token != token);
        let removed = before - self.pending.len();
        if removed > 0 {
            debug!(removed, "Purged pending worker tasks");
        }
        removed
    }

    /// Tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Cloneable handle for posting to a capture worker.
pub struct WorkerHandle<S> {
    tx: Sender<Message<S>>,
    running: Arc<AtomicBool>,
    seq: Arc<AtomicU64>,
    token: CancellationToken,
    thread: ThreadId,
}

impl<S> Clone for WorkerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            running: Arc::clone(&self.running),
            seq: Arc::clone(&self.seq),
            token: self.token,
            thread: self.thread,
        }
    }
}

impl<S> WorkerHandle<S> {
    /// Post a task to run as soon as possible. Returns `false` when the
    /// worker is not running and the task was dropped.
    pub fn post_if_running<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut S, &mut Scheduler<S>) + Send + 'static,
    {
        self.post_delayed_if_running(Duration::ZERO, task)
    }

    /// Post a task to run after `delay`. Returns `false` when the worker is
    /// not running and the task was dropped.
    pub fn post_delayed_if_running<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce(&mut S, &mut Scheduler<S>) + Send + 'static,
    {
        if !self.is_running() {
            return false;
        }
        let job = Job {
            due: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            token: self.token,
            task: Box::new(task),
        };
        self.tx.send(Message::Job(job)).is_ok()
    }

    /// Whether the worker currently accepts tasks.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start accepting tasks. Returns the previous value.
    pub fn mark_running(&self) -> bool {
        self.running.swap(true, Ordering::AcqRel)
    }

    /// Stop accepting tasks.
    pub fn mark_stopped(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Token attached to every task this worker accepts.
    #[must_use]
    pub const fn token(&self) -> CancellationToken {
        self.token
    }

    /// Whether the caller is on the worker thread.
    #[must_use]
    pub fn is_on_worker(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Fail with `WrongThread` unless called on the worker thread.
    pub fn check_on_worker(&self) -> Result<()> {
        if self.is_on_worker() {
            Ok(())
        } else {
            error!(
                thread = ?thread::current().name(),
                "Worker-confined operation called from another thread"
            );
            Err(CaptureError::WrongThread)
        }
    }
}

/// How long [`CaptureWorker::shutdown`] waits for the thread by default.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(7000);

/// Owner of the worker thread. Dropping it shuts the thread down, waiting at
/// most the shutdown timeout before detaching it.
pub struct CaptureWorker<S> {
    handle: WorkerHandle<S>,
    join: Option<JoinHandle<()>>,
    exited: Receiver<()>,
    shutdown_timeout: Duration,
}

impl<S: 'static> CaptureWorker<S> {
    /// Spawn the worker thread. `init` runs on that thread and builds the
    /// state every task is executed against.
    pub fn spawn<F>(name: &str, init: F) -> Result<Self>
    where
        F: FnOnce(WorkerHandle<S>) -> S + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let running = Arc::new(AtomicBool::new(false));
        let seq = Arc::new(AtomicU64::new(0));
        let token = CancellationToken::next();

        let thread_tx = tx.clone();
        let thread_running = Arc::clone(&running);
        let thread_seq = Arc::clone(&seq);
        let (exited_tx, exited) = crossbeam_channel::bounded(1);
        let join = thread::Builder::new().name(name.to_owned()).spawn(move || {
            let handle = WorkerHandle {
                tx: thread_tx,
                running: thread_running,
                seq: thread_seq,
                token,
                thread: thread::current().id(),
            };
            let state = init(handle);
            run_loop(state, Scheduler::new(rx));
            let _ = exited_tx.send(());
        })?;

        debug!(name, "Capture worker started");

        let handle = WorkerHandle {
            tx,
            running,
            seq,
            token,
            thread: join.thread().id(),
        };
        Ok(Self {
            handle,
            join: Some(join),
            exited,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        })
    }
}

impl<S> CaptureWorker<S> {
    /// Handle for posting to this worker.
    #[must_use]
    pub const fn handle(&self) -> &WorkerHandle<S> {
        &self.handle
    }

    /// Bound the wait for the thread to finish on shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Stop accepting tasks, drop everything pending and wait for the thread
    /// to exit. A task still running after the shutdown timeout is left to
    /// finish on its own and the thread is detached.
    pub fn shutdown(&mut self) -> Result<()> {
        self.handle.mark_stopped();
        let _ = self.handle.tx.send(Message::Shutdown);
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        if self.handle.is_on_worker() {
            // Shut down from one of its own tasks; the loop exits on its own.
            return Ok(());
        }
        match self.exited.recv_timeout(self.shutdown_timeout) {
            // Disconnected means the thread unwound without signalling.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if join.join().is_err() {
                    warn!("Capture worker thread panicked");
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout = ?self.shutdown_timeout,
                    thread = ?join.thread().name(),
                    "Capture worker did not exit in time, detaching"
                );
                Err(CaptureError::Timeout)
            }
        }
    }

    /// Name of the worker thread.
    #[must_use]
    pub fn thread_name(&self) -> Option<&str> {
        self.join.as_ref().and_then(|join| join.thread().name())
    }
}

impl<S> Drop for CaptureWorker<S> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn run_loop<S>(mut state: S, mut scheduler: Scheduler<S>) {
    loop {
        scheduler.drain_channel();
        if scheduler.shutdown {
            break;
        }

        let now = Instant::now();
        if let Some(job) = scheduler.pop_due(now) {
            (job.task)(&mut state, &mut scheduler);
            continue;
        }

        let next_due = scheduler.pending.peek().map(|job| job.due);
        let message = match next_due {
            Some(due) => match scheduler.rx.recv_timeout(due.saturating_duration_since(now)) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match scheduler.rx.recv() {
                Ok(message) => message,
                Err(_) => break,
            },
        };
        scheduler.accept(message);
    }
    debug!(dropped = scheduler.pending(), "Capture worker exiting");
}
