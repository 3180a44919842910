//! Bounded-concurrency admission queue
//!
//! At most `bound` requests execute at once; excess work waits in a FIFO
//! backlog. Completion releases the slot unconditionally (panics included)
//! and drains the backlog with an explicit loop, so the bound self-heals
//! even after failing tasks and long backlogs never recurse.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A deferred unit of request processing, owned by the backlog while queued
pub type QueuedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct State {
    active: usize,
    backlog: VecDeque<QueuedTask>,
}

struct Inner {
    bound: usize,
    state: Mutex<State>,
}

/// FIFO admission queue gating concurrent request execution
#[derive(Clone)]
pub struct AdmissionQueue {
    inner: Arc<Inner>,
}

impl AdmissionQueue {
    /// Create a queue admitting up to `bound` concurrent tasks.
    pub fn new(bound: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                bound: bound.max(1),
                state: Mutex::new(State {
                    active: 0,
                    backlog: VecDeque::new(),
                }),
            }),
        }
    }

    /// Whether a new task would start without queueing.
    pub fn can_admit_immediately(&self) -> bool {
        self.inner.state.lock().active < self.inner.bound
    }

    /// Admit a task: start it if a slot is free, otherwise append it to
    /// the backlog in arrival order.
    pub fn admit(&self, task: QueuedTask) {
        let mut state = self.inner.state.lock();
        if state.active < self.inner.bound {
            state.active += 1;
            drop(state);
            spawn_slot(self.inner.clone(), task);
        } else {
            state.backlog.push_back(task);
        }
    }

    /// Discard all backlog tasks without running them (shutdown path).
    /// Dropping a task resolves its connection with 503 upstream.
    pub fn clear(&self) {
        self.inner.state.lock().backlog.clear();
    }

    /// Currently executing task count.
    pub fn active(&self) -> usize {
        self.inner.state.lock().active
    }

    /// Tasks waiting for a slot.
    pub fn backlog_len(&self) -> usize {
        self.inner.state.lock().backlog.len()
    }
}

/// Runs a task inside an occupied slot. The guard releases the slot when
/// the task future resolves or is dropped mid-panic.
fn spawn_slot(inner: Arc<Inner>, task: QueuedTask) {
    tokio::spawn(async move {
        let _slot = SlotGuard { inner };
        task.await;
    });
}

struct SlotGuard {
    inner: Arc<Inner>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        // Release the slot, then pop backlog tasks in arrival order while
        // slots stay free. Started outside the lock to keep the critical
        // section small.
        let mut ready = Vec::new();
        {
            let mut state = self.inner.state.lock();
            state.active -= 1;
            while state.active < self.inner.bound {
                match state.backlog.pop_front() {
                    Some(task) => {
                        state.active += 1;
                        ready.push(task);
                    }
                    None => break,
                }
            }
        }
        for task in ready {
            spawn_slot(self.inner.clone(), task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::sleep;

    fn blocking_task(
        started: Arc<AtomicUsize>,
    ) -> (oneshot::Sender<()>, QueuedTask) {
        let (tx, rx) = oneshot::channel();
        let task: QueuedTask = Box::pin(async move {
            started.fetch_add(1, Ordering::SeqCst);
            let _ = rx.await;
        });
        (tx, task)
    }

    #[tokio::test]
    async fn test_bound_respected() {
        let queue = AdmissionQueue::new(2);
        let started = Arc::new(AtomicUsize::new(0));

        let mut releases = Vec::new();
        for _ in 0..3 {
            let (tx, task) = blocking_task(started.clone());
            releases.push(tx);
            queue.admit(task);
        }
        sleep(Duration::from_millis(20)).await;

        // Two run, the third waits
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(queue.active(), 2);
        assert_eq!(queue.backlog_len(), 1);
        assert!(!queue.can_admit_immediately());

        // Releasing one admits the third
        releases.remove(0).send(()).unwrap();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert_eq!(queue.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_backlog_is_fifo() {
        let queue = AdmissionQueue::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let (release, gate) = oneshot::channel::<()>();
        queue.admit(Box::pin(async move {
            let _ = gate.await;
        }));
        sleep(Duration::from_millis(10)).await;

        for label in ["t1", "t2", "t3"] {
            let order = order.clone();
            queue.admit(Box::pin(async move {
                order.lock().push(label);
            }));
        }
        assert_eq!(queue.backlog_len(), 3);

        release.send(()).unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(*order.lock(), vec!["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn test_panicking_task_frees_slot() {
        let queue = AdmissionQueue::new(1);
        queue.admit(Box::pin(async {
            panic!("task blew up");
        }));
        sleep(Duration::from_millis(20)).await;

        // The slot self-healed and the next task runs
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        queue.admit(Box::pin(async move {
            ran2.fetch_add(1, Ordering::SeqCst);
        }));
        sleep(Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test]
    async fn test_clear_discards_backlog() {
        let queue = AdmissionQueue::new(1);
        let (release, gate) = oneshot::channel::<()>();
        queue.admit(Box::pin(async move {
            let _ = gate.await;
        }));
        sleep(Duration::from_millis(10)).await;

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        queue.admit(Box::pin(async move {
            ran2.fetch_add(1, Ordering::SeqCst);
        }));
        queue.clear();
        assert_eq!(queue.backlog_len(), 0);

        release.send(()).unwrap();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
