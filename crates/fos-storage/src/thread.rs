//! Storage Thread
//!
//! One named background thread running storage tasks in FIFO order. Delayed
//! tasks wait in a timer heap and join the queue when due. Termination
//! queues a poison pill behind everything already dispatched and joins.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crate::{lock, Result};

/// Task function type
pub type TaskFn = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(TaskFn),
    Terminate,
}

/// Task waiting for its deadline
struct DelayedTask {
    deadline: Instant,
    /// Dispatch order, breaks deadline ties
    seq: u64,
    task: TaskFn,
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    // Reversed: BinaryHeap pops the earliest deadline first
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    messages: VecDeque<Message>,
    delayed: BinaryHeap<DelayedTask>,
    next_seq: u64,
    /// A task is executing
    running: bool,
    /// Terminate was requested; no new tasks are accepted
    terminating: bool,
    /// Worker loop has exited
    exited: bool,
}

impl QueueState {
    /// Move due delayed tasks to the back of the FIFO queue
    fn promote_due(&mut self, now: Instant) {
        while self.delayed.peek().is_some_and(|d| d.deadline <= now) {
            if let Some(due) = self.delayed.pop() {
                self.messages.push_back(Message::Run(due.task));
            }
        }
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.exited
            || (!self.running && self.messages.is_empty() && !self.delayed.peek().is_some_and(|d| d.deadline <= now))
    }
}

/// Worker queue
struct TaskQueue {
    state: Mutex<QueueState>,
    /// Wakes the worker
    condvar: Condvar,
    /// Wakes `wait_for_idle` callers
    idle: Condvar,
    /// Outstanding [`ActivityGuard`]s
    activity: AtomicUsize,
}

impl TaskQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            condvar: Condvar::new(),
            idle: Condvar::new(),
            activity: AtomicUsize::new(0),
        }
    }

    fn next_task(&self) -> Option<TaskFn> {
        let mut state = lock(&self.state);
        loop {
            let now = Instant::now();
            state.promote_due(now);

            match state.messages.pop_front() {
                Some(Message::Run(task)) => {
                    state.running = true;
                    return Some(task);
                }
                Some(Message::Terminate) => {
                    if state.delayed.is_empty() {
                        return None;
                    }
                    // Pending timers fire early rather than being dropped
                    let mut remaining = std::mem::take(&mut state.delayed).into_sorted_vec();
                    remaining.reverse();
                    state.messages.extend(remaining.into_iter().map(|d| Message::Run(d.task)));
                    state.messages.push_back(Message::Terminate);
                    continue;
                }
                None => {}
            }

            self.idle.notify_all();
            state = match state.delayed.peek() {
                Some(next) => {
                    let timeout = next.deadline.saturating_duration_since(now);
                    self.condvar.wait_timeout(state, timeout).unwrap_or_else(PoisonError::into_inner).0
                }
                None => self.condvar.wait(state).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn task_finished(&self) {
        let mut state = lock(&self.state);
        state.running = false;
        if state.is_idle(Instant::now()) {
            self.idle.notify_all();
        }
    }

    fn worker_exited(&self) {
        let mut state = lock(&self.state);
        state.running = false;
        state.exited = true;
        state.messages.clear();
        state.delayed.clear();
        self.idle.notify_all();
    }
}

/// Keeps [`StorageThread::has_pending_activity`] true while alive
#[derive(Debug)]
#[must_use = "activity ends when the guard is dropped"]
pub struct ActivityGuard {
    queue: Arc<TaskQueue>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.queue.activity.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("activity", &self.activity.load(Ordering::Relaxed))
            .finish()
    }
}

/// Background thread for storage I/O
pub struct StorageThread {
    queue: Arc<TaskQueue>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    name: String,
}

impl std::fmt::Debug for StorageThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageThread")
            .field("name", &self.name)
            .field("running", &lock(&self.thread).is_some())
            .finish()
    }
}

impl StorageThread {
    /// Spawn the worker thread
    pub fn new(name: &str) -> Result<Self> {
        let queue = Arc::new(TaskQueue::new());
        let queue_clone = Arc::clone(&queue);

        let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
            while let Some(task) = queue_clone.next_task() {
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    tracing::error!("storage task panicked");
                }
                queue_clone.task_finished();
            }
            queue_clone.worker_exited();
        })?;
        tracing::debug!("started storage thread {name}");

        Ok(Self {
            queue,
            thread_id: thread.thread().id(),
            thread: Mutex::new(Some(thread)),
            name: name.to_string(),
        })
    }

    /// Get thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a task. Returns false once termination has begun.
    pub fn dispatch<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = lock(&self.queue.state);
        if state.terminating {
            tracing::warn!("{}: task dispatched after terminate", self.name);
            return false;
        }
        state.messages.push_back(Message::Run(Box::new(task)));
        self.queue.condvar.notify_one();
        true
    }

    /// Queue a task to run once `delay` has passed
    pub fn dispatch_after<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = lock(&self.queue.state);
        if state.terminating {
            tracing::warn!("{}: delayed task dispatched after terminate", self.name);
            return false;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.delayed.push(DelayedTask {
            deadline: Instant::now() + delay,
            seq,
            task: Box::new(task),
        });
        self.queue.condvar.notify_one();
        true
    }

    /// Whether the caller is running on this thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Queued tasks, including delayed ones not yet due
    pub fn pending_tasks(&self) -> usize {
        let state = lock(&self.queue.state);
        state.messages.iter().filter(|m| matches!(m, Message::Run(_))).count() + state.delayed.len()
    }

    /// Block until no task is queued, due or running. Delayed tasks that are
    /// not yet due do not count. Returns immediately on the worker itself.
    pub fn wait_for_idle(&self) {
        if self.is_current() {
            return;
        }
        let mut state = lock(&self.queue.state);
        while !state.is_idle(Instant::now()) {
            let timeout = state
                .delayed
                .peek()
                .map_or(Duration::from_millis(100), |d| d.deadline.saturating_duration_since(Instant::now()));
            state = self
                .queue
                .idle
                .wait_timeout(state, timeout.max(Duration::from_millis(1)))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Mark work that must finish before the process may suspend
    pub fn activity_guard(&self) -> ActivityGuard {
        self.queue.activity.fetch_add(1, Ordering::SeqCst);
        ActivityGuard {
            queue: Arc::clone(&self.queue),
        }
    }

    /// Whether any [`ActivityGuard`] is alive
    pub fn has_pending_activity(&self) -> bool {
        self.queue.activity.load(Ordering::SeqCst) > 0
    }

    /// Whether [`terminate`](Self::terminate) has been called
    pub fn is_terminating(&self) -> bool {
        lock(&self.queue.state).terminating
    }

    /// Run everything already dispatched, then stop and join the worker.
    /// Delayed tasks run immediately instead of waiting for their deadline.
    pub fn terminate(&self) {
        {
            let mut state = lock(&self.queue.state);
            if !state.terminating {
                state.terminating = true;
                state.messages.push_back(Message::Terminate);
                self.queue.condvar.notify_one();
            }
        }
        if self.is_current() {
            // The worker exits after the current task; it cannot join itself
            return;
        }
        let handle = lock(&self.thread).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("{}: worker panicked", self.name);
            }
            tracing::debug!("terminated storage thread {}", self.name);
        }
    }
}

impl Drop for StorageThread {
    fn drop(&mut self) {
        self.terminate();
    }
}
