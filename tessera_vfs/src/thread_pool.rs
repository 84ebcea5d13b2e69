//! A bounded worker pool with a shared FIFO task queue.
//!
//! The pool is the only source of worker parallelism in the storage core; the
//! [`Vfs`](crate::Vfs) uses it to parallelise range reads and callers may use
//! it for fire-and-forget work via [`ThreadPool::spawn`].

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::error;

use crate::error::VfsError;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Job>,
    terminate: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    cv: Condvar,
}

/// A fixed-size pool of worker threads draining a FIFO task queue.
///
/// Tasks start in enqueue order; completion order is unconstrained. A task
/// that fails records an error in its [`TaskHandle`] and the worker keeps
/// running; a task that panics is captured and surfaced as
/// [`VfsError::TaskPanicked`]. Tasks are never retried and cannot be
/// cancelled once enqueued.
///
/// Dropping the pool waits for the queue to drain, then signals termination
/// and joins every worker. Tasks enqueued concurrently with the drop are a
/// caller contract: the drain is defined against the tasks enqueued strictly
/// before it.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Create a pool with `num_threads` workers (clamped to at least one).
    #[must_use]
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState::default()),
            cv: Condvar::new(),
        });
        let workers = (0..num_threads)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || Self::worker(&shared))
            })
            .collect();
        Self { shared, workers }
    }

    /// The number of worker threads.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Enqueue `task` and return a handle resolving to its result.
    ///
    /// The task starts after every task enqueued before it has started.
    pub fn enqueue<T, F>(&self, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, VfsError> + Send + 'static,
    {
        let handle = TaskHandle::pending();
        let completion = handle.clone_shared();
        let job: Job = Box::new(move || {
            let result = match std::panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(result) => result,
                Err(_) => {
                    error!("thread pool task panicked");
                    Err(VfsError::TaskPanicked)
                }
            };
            completion.complete(result);
        });
        let mut state = self.shared.state.lock();
        state.queue.push_back(job);
        self.shared.cv.notify_one();
        handle
    }

    /// Enqueue a fire-and-forget task, discarding its result.
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        drop(self.enqueue(move || {
            task();
            Ok(())
        }));
    }

    /// Block until every handle has resolved.
    ///
    /// Returns `true` iff every task completed successfully. Handles are
    /// waited on in arrival order; the queue lock is not held while waiting.
    pub fn wait_all<T>(&self, handles: Vec<TaskHandle<T>>) -> bool {
        let mut all_ok = true;
        for handle in handles {
            all_ok &= handle.wait().is_ok();
        }
        all_ok
    }

    /// Block until the task queue is empty.
    ///
    /// Tasks already popped by a worker may still be running.
    fn wait_queue_empty(&self) {
        let mut state = self.shared.state.lock();
        while !state.queue.is_empty() {
            self.shared.cv.wait(&mut state);
        }
    }

    fn worker(shared: &PoolShared) {
        loop {
            let job = {
                let mut state = shared.state.lock();
                while !state.terminate && state.queue.is_empty() {
                    shared.cv.wait(&mut state);
                }
                if state.terminate {
                    break;
                }
                let job = state.queue.pop_front().expect("queue is non-empty");
                shared.cv.notify_all();
                job
            };
            job();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.wait_queue_empty();
        {
            let mut state = self.shared.state.lock();
            state.terminate = true;
            self.shared.cv.notify_all();
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("thread pool worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("num_threads", &self.workers.len())
            .finish_non_exhaustive()
    }
}

struct HandleShared<T> {
    result: Mutex<Option<Result<T, VfsError>>>,
    cv: Condvar,
}

impl<T> HandleShared<T> {
    fn complete(&self, result: Result<T, VfsError>) {
        *self.result.lock() = Some(result);
        self.cv.notify_all();
    }
}

/// A handle to a task enqueued on a [`ThreadPool`].
///
/// Resolves to the task's return value, or to the error status of a failed
/// or panicked task.
#[must_use]
pub struct TaskHandle<T> {
    shared: Arc<HandleShared<T>>,
}

impl<T> TaskHandle<T> {
    fn pending() -> Self {
        Self {
            shared: Arc::new(HandleShared {
                result: Mutex::new(None),
                cv: Condvar::new(),
            }),
        }
    }

    fn clone_shared(&self) -> Arc<HandleShared<T>> {
        Arc::clone(&self.shared)
    }

    /// Returns true if the task has resolved.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.shared.result.lock().is_some()
    }

    /// Block until the task resolves and return its result.
    pub fn wait(self) -> Result<T, VfsError> {
        let mut result = self.shared.result.lock();
        while result.is_none() {
            self.shared.cv.wait(&mut result);
        }
        result.take().expect("result is set")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn single_thread() {
        let pool = ThreadPool::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let handles = (0..100)
            .map(|_| {
                let counter = counter.clone();
                pool.enqueue(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();
        assert!(pool.wait_all(handles));
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn multiple_threads() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let handles = (0..100)
            .map(|_| {
                let counter = counter.clone();
                pool.enqueue(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();
        assert!(pool.wait_all(handles));
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn drop_without_wait_runs_all_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(4);
            for _ in 0..100 {
                let counter = counter.clone();
                pool.spawn(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn task_results() {
        let pool = ThreadPool::new(2);
        let ok = pool.enqueue(|| Ok(7u64));
        let err = pool.enqueue(|| Err::<(), _>(VfsError::Other("boom".to_string())));
        assert_eq!(ok.wait().unwrap(), 7);
        assert!(err.wait().is_err());
    }

    #[test]
    fn failed_task_does_not_poison_pool() {
        let pool = ThreadPool::new(1);
        let failed = pool.enqueue(|| Err::<(), _>(VfsError::Other("boom".to_string())));
        let ok = pool.enqueue(|| Ok(1));
        assert!(!pool.wait_all(vec![failed]));
        assert_eq!(ok.wait().unwrap(), 1);
    }

    #[test]
    fn panicked_task_is_captured() {
        let pool = ThreadPool::new(2);
        let panicked = pool.enqueue(|| -> Result<(), VfsError> { panic!("kaboom") });
        assert!(matches!(panicked.wait(), Err(VfsError::TaskPanicked)));
        let ok = pool.enqueue(|| Ok(2));
        assert_eq!(ok.wait().unwrap(), 2);
    }

    #[test]
    fn empty_wait() {
        let pool = ThreadPool::new(2);
        assert!(pool.wait_all(Vec::<TaskHandle<()>>::new()));
    }
}
