//! Serial task executor backing one pipeline stage.
//!
//! Each stage is a single named worker thread draining a deadline-ordered
//! task queue. Tasks submitted to one stage run strictly in submission order
//! (for equal deadlines); tasks on different stages are unordered. A stage's
//! pending work can be cancelled en masse, which is what makes the seek and
//! release quiesce protocols stage-scoped: cancellation on one stage cannot
//! disturb another.
//!
//! Front-posted tasks run before everything else regardless of deadlines.
//! Only the control path uses them, to get its quiesce request ahead of any
//! backlog of polling ticks.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

type Task = Box<dyn FnOnce() + Send + 'static>;

const CLASS_FRONT: u8 = 0;
const CLASS_NORMAL: u8 = 1;

struct Entry {
    class: u8,
    due: Instant,
    seq: u64,
    task: Task,
}

impl Entry {
    fn key(&self) -> (u8, Instant, u64) {
        (self.class, self.due, self.seq)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap; invert so the earliest entry pops first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.key().cmp(&self.key())
    }
}

struct StageInner {
    name: &'static str,
    queue: Mutex<BinaryHeap<Entry>>,
    condvar: Condvar,
    stopped: AtomicBool,
    seq: AtomicU64,
}

enum NextAction {
    Idle,
    RunHead,
    SleepUntil(Instant),
}

fn worker(inner: Arc<StageInner>) {
    loop {
        let mut queue = inner.queue.lock();
        if inner.stopped.load(Ordering::Acquire) {
            break;
        }

        let now = Instant::now();
        let next = match queue.peek() {
            None => NextAction::Idle,
            Some(e) if e.class == CLASS_FRONT || e.due <= now => NextAction::RunHead,
            Some(e) => NextAction::SleepUntil(e.due),
        };

        match next {
            NextAction::Idle => {
                inner.condvar.wait(&mut queue);
            }
            NextAction::SleepUntil(due) => {
                // Woken early or on time either way; the loop re-checks due.
                let _ = inner.condvar.wait_until(&mut queue, due);
            }
            NextAction::RunHead => {
                if let Some(entry) = queue.pop() {
                    drop(queue);
                    (entry.task)();
                }
            }
        }
    }

    // Pending tasks die with the stage.
    let dropped = {
        let mut queue = inner.queue.lock();
        let n = queue.len();
        queue.clear();
        n
    };
    if dropped > 0 {
        tracing::debug!("stage {}: discarded {} tasks on quit", inner.name, dropped);
    }
}

/// Cheap-to-clone submission handle for a [`Stage`].
#[derive(Clone)]
pub struct StageHandle {
    inner: Arc<StageInner>,
}

impl StageHandle {
    fn push(&self, class: u8, due: Instant, task: Task) {
        if self.inner.stopped.load(Ordering::Acquire) {
            return;
        }
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let mut queue = self.inner.queue.lock();
        queue.push(Entry {
            class,
            due,
            seq,
            task,
        });
        drop(queue);
        self.inner.condvar.notify_one();
    }

    /// Runs `task` after all currently-due work.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.push(CLASS_NORMAL, Instant::now(), Box::new(task));
    }

    /// Runs `task` no earlier than `delay` from now.
    pub fn post_delayed(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        self.push(CLASS_NORMAL, Instant::now() + delay, Box::new(task));
    }

    /// Runs `task` no earlier than the absolute deadline `at`.
    pub fn post_at(&self, at: Instant, task: impl FnOnce() + Send + 'static) {
        self.push(CLASS_NORMAL, at, Box::new(task));
    }

    /// Runs `task` before every pending entry, regardless of deadlines.
    pub fn post_front(&self, task: impl FnOnce() + Send + 'static) {
        self.push(CLASS_FRONT, Instant::now(), Box::new(task));
    }

    /// Drops every pending task. In-flight work is not preempted; the stage
    /// observes the cancellation at its next dequeue.
    pub fn cancel_pending(&self) {
        let dropped = {
            let mut queue = self.inner.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        if dropped > 0 {
            tracing::trace!("stage {}: cancelled {} pending tasks", self.inner.name, dropped);
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }
}

/// Owner of one stage worker thread.
pub struct Stage {
    inner: Arc<StageInner>,
    thread: Option<JoinHandle<()>>,
}

impl Stage {
    /// Spawns the stage's worker thread.
    pub fn spawn(name: &'static str) -> Self {
        let inner = Arc::new(StageInner {
            name,
            queue: Mutex::new(BinaryHeap::new()),
            condvar: Condvar::new(),
            stopped: AtomicBool::new(false),
            seq: AtomicU64::new(0),
        });
        let worker_inner = Arc::clone(&inner);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker(worker_inner))
            .expect("failed to spawn stage thread");
        Self {
            inner,
            thread: Some(thread),
        }
    }

    pub fn handle(&self) -> StageHandle {
        StageHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Stops the worker, discarding pending tasks, and joins it.
    pub fn shutdown(&mut self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.condvar.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_tasks_run_in_submission_order() {
        let stage = Stage::spawn("test-order");
        let handle = stage.handle();
        let (tx, rx) = mpsc::channel();

        for i in 0..10 {
            let tx = tx.clone();
            handle.post(move || {
                let _ = tx.send(i);
            });
        }

        let got: Vec<i32> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_delayed_task_waits() {
        let stage = Stage::spawn("test-delay");
        let handle = stage.handle();
        let (tx, rx) = mpsc::channel();

        let start = Instant::now();
        let delay = Duration::from_millis(50);
        handle.post_delayed(delay, move || {
            let _ = tx.send(Instant::now());
        });

        let fired = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(fired.duration_since(start) >= delay);
    }

    #[test]
    fn test_front_post_preempts_pending() {
        let stage = Stage::spawn("test-front");
        let handle = stage.handle();
        let (tx, rx) = mpsc::channel();

        // Block the worker so both posts are pending together.
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let gate_task = Arc::clone(&gate);
        handle.post(move || {
            let (lock, cv) = &*gate_task;
            let mut open = lock.lock();
            while !*open {
                cv.wait(&mut open);
            }
        });

        let tx_normal = tx.clone();
        handle.post(move || {
            let _ = tx_normal.send("normal");
        });
        handle.post_front(move || {
            let _ = tx.send("front");
        });

        {
            let (lock, cv) = &*gate;
            *lock.lock() = true;
            cv.notify_all();
        }

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "front");
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "normal");
    }

    #[test]
    fn test_cancel_pending_drops_queued_tasks() {
        let stage = Stage::spawn("test-cancel");
        let handle = stage.handle();
        let (tx, rx) = mpsc::channel::<&str>();

        handle.post_delayed(Duration::from_millis(100), move || {
            let _ = tx.send("should not run");
        });
        handle.cancel_pending();

        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn test_shutdown_discards_pending() {
        let mut stage = Stage::spawn("test-shutdown");
        let handle = stage.handle();
        let (tx, rx) = mpsc::channel::<&str>();

        handle.post_delayed(Duration::from_secs(10), move || {
            let _ = tx.send("late");
        });
        stage.shutdown();

        assert!(rx.try_recv().is_err());
    }
}
