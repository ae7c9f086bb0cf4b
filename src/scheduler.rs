//! Shared background scheduler.
//!
//! One process-wide instance runs:
//! - recurring tasks (heap polling, cache expiry), cancelled when their
//!   [`TaskHandle`] is dropped
//! - one-shot jobs submitted through an [`ExecutionContext`]
//!
//! Threads start lazily on first use.

use std::collections::{BinaryHeap, VecDeque};
use std::cmp::Ordering;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver};
use parking_lot::{Condvar, Mutex};

use crate::log;

// =============================================================================
// Public API
// =============================================================================

/// Global scheduler instance.
pub static SCHEDULER: LazyLock<Scheduler> = LazyLock::new(Scheduler::new);

type Job = Box<dyn FnOnce() + Send>;
type Recurring = Arc<dyn Fn() + Send + Sync>;

/// Scheduler with a timer thread and a worker pool.
pub struct Scheduler {
    /// One-shot jobs ready to run
    queue: Mutex<VecDeque<Job>>,
    /// Worker notification
    notify: Condvar,
    /// Recurring tasks ordered by next due time
    timers: Mutex<BinaryHeap<Timer>>,
    /// Timer thread notification
    timer_notify: Condvar,
    next_id: AtomicU64,
    started: AtomicBool,
}

/// Keeps a recurring task alive; dropping it cancels the task.
#[derive(Debug)]
pub struct TaskHandle {
    id: u64,
    alive: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.alive.store(false, AtomicOrdering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.alive.load(AtomicOrdering::SeqCst)
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Result of a submitted job.
pub struct Pending<T> {
    rx: Receiver<T>,
}

impl<T> Pending<T> {
    /// Block until the job completes. `None` if it panicked.
    pub fn wait(self) -> Option<T> {
        self.rx.recv().ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_get(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

struct Timer {
    due: Instant,
    id: u64,
    interval: Duration,
    task: Recurring,
    alive: Arc<AtomicBool>,
    /// Set while a run is in progress, so slow runs never overlap
    running: Arc<AtomicBool>,
}

// Timer ordering: earliest due first (BinaryHeap is max-heap)
impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        other.due.cmp(&self.due).then_with(|| other.id.cmp(&self.id))
    }
}
impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Timer {}

// =============================================================================
// Public methods
// =============================================================================

impl Scheduler {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Condvar::new(),
            timers: Mutex::new(BinaryHeap::new()),
            timer_notify: Condvar::new(),
            next_id: AtomicU64::new(1),
            started: AtomicBool::new(false),
        }
    }

    /// Run `task` every `interval`, first run one interval from now.
    pub fn schedule_every(
        &'static self,
        interval: Duration,
        task: impl Fn() + Send + Sync + 'static,
    ) -> TaskHandle {
        self.ensure_started();

        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        let alive = Arc::new(AtomicBool::new(true));
        self.timers.lock().push(Timer {
            due: Instant::now() + interval,
            id,
            interval,
            task: Arc::new(task),
            alive: alive.clone(),
            running: Arc::new(AtomicBool::new(false)),
        });
        self.timer_notify.notify_one();

        TaskHandle { id, alive }
    }

    /// Queue a one-shot job on the worker pool.
    pub fn submit<T: Send + 'static>(
        &'static self,
        job: impl FnOnce() -> T + Send + 'static,
    ) -> Pending<T> {
        let (tx, rx) = channel::bounded(1);
        self.enqueue(Box::new(move || {
            let _ = tx.send(job());
        }));
        Pending { rx }
    }

    /// Number of live recurring tasks.
    pub fn recurring_count(&self) -> usize {
        self.timers
            .lock()
            .iter()
            .filter(|t| t.alive.load(AtomicOrdering::SeqCst))
            .count()
    }

    fn enqueue(&'static self, job: Job) {
        self.ensure_started();
        self.queue.lock().push_back(job);
        self.notify.notify_one();
    }
}

// =============================================================================
// Threads
// =============================================================================

impl Scheduler {
    fn ensure_started(&'static self) {
        if self.started.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        let n = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .max(2);
        for i in 0..n {
            let spawned = std::thread::Builder::new()
                .name(format!("assetflow-worker-{i}"))
                .spawn(move || self.run_worker());
            if let Err(e) = spawned {
                log!("error"; "failed to spawn worker thread: {e}");
            }
        }
        if let Err(e) = std::thread::Builder::new()
            .name("assetflow-timer".into())
            .spawn(move || self.run_timer())
        {
            log!("error"; "failed to spawn timer thread: {e}");
        }
    }

    fn run_worker(&self) {
        loop {
            let job = {
                let mut queue = self.queue.lock();
                loop {
                    if let Some(job) = queue.pop_front() {
                        break job;
                    }
                    self.notify.wait(&mut queue);
                }
            };
            // Catch panics so one failing job does not take a worker down
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                log!("error"; "background job panicked");
            }
        }
    }

    fn run_timer(&'static self) {
        let mut timers = self.timers.lock();
        loop {
            let Some(next) = timers.peek() else {
                self.timer_notify.wait(&mut timers);
                continue;
            };

            let now = Instant::now();
            if next.due > now {
                let due = next.due;
                self.timer_notify.wait_until(&mut timers, due);
                continue;
            }

            let Some(mut timer) = timers.pop() else {
                continue;
            };
            if !timer.alive.load(AtomicOrdering::SeqCst) {
                continue;
            }

            if !timer.running.swap(true, AtomicOrdering::SeqCst) {
                let task = timer.task.clone();
                let alive = timer.alive.clone();
                let running = timer.running.clone();
                self.queue.lock().push_back(Box::new(move || {
                    if alive.load(AtomicOrdering::SeqCst) {
                        let result = catch_unwind(AssertUnwindSafe(|| task()));
                        running.store(false, AtomicOrdering::SeqCst);
                        if result.is_err() {
                            log!("error"; "recurring task panicked");
                        }
                    } else {
                        running.store(false, AtomicOrdering::SeqCst);
                    }
                }));
                self.notify.notify_one();
            }

            timer.due = now + timer.interval;
            timers.push(timer);
        }
    }
}

// =============================================================================
// Execution context
// =============================================================================

/// Where "as soon as possible" work runs.
pub trait ExecutionContext: Send + Sync {
    fn execute(&self, job: Box<dyn FnOnce() + Send>);
}

impl dyn ExecutionContext {
    /// Submit `job` and get a handle to its result.
    pub fn execute_asap<T: Send + 'static>(
        &self,
        job: impl FnOnce() -> T + Send + 'static,
    ) -> Pending<T> {
        let (tx, rx) = channel::bounded(1);
        self.execute(Box::new(move || {
            let _ = tx.send(job());
        }));
        Pending { rx }
    }
}

/// Runs jobs on the shared worker pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPoolContext;

impl ExecutionContext for ThreadPoolContext {
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        SCHEDULER.enqueue(job);
    }
}

/// Runs jobs immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineContext;

impl ExecutionContext for InlineContext {
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_submit_returns_result() {
        let pending = SCHEDULER.submit(|| 6 * 7);
        assert_eq!(pending.wait(), Some(42));
    }

    #[test]
    fn test_panicking_job_yields_none() {
        let pending = SCHEDULER.submit(|| -> u32 { panic!("boom") });
        assert_eq!(pending.wait(), None);
        // Workers survive
        assert_eq!(SCHEDULER.submit(|| 1).wait(), Some(1));
    }

    #[test]
    fn test_recurring_task_stops_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let handle = SCHEDULER.schedule_every(Duration::from_millis(10), move || {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(AtomicOrdering::SeqCst) < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(count.load(AtomicOrdering::SeqCst) >= 2);

        drop(handle);
        std::thread::sleep(Duration::from_millis(50));
        let after_drop = count.load(AtomicOrdering::SeqCst);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(AtomicOrdering::SeqCst), after_drop);
    }

    #[test]
    fn test_contexts() {
        let inline: &dyn ExecutionContext = &InlineContext;
        let pending = inline.execute_asap(|| "now");
        assert_eq!(pending.try_get(), Some("now"));

        let pool: &dyn ExecutionContext = &ThreadPoolContext;
        assert_eq!(pool.execute_asap(|| 5).wait_timeout(Duration::from_secs(5)), Some(5));
    }
}
