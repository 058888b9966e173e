// WorkerPool - data-parallel dispatcher over a fixed set of OS threads
//
// A single delegate function is run concurrently over an array of per-job
// payloads. Threads are created up-front and reused across calls to run();
// when the number of jobs exceeds the number of threads, work is performed
// in sequential batches of at most `threads` jobs. run() does not return
// until every job has completed or a captured panic has been rethrown.
//
// All coordination goes through one mutex and one condition variable: the
// per-worker state array, the remaining-jobs counter and the per-worker
// panic slots are guarded together, with no fine-grained locking.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

/// Worker life cycle: Waiting -> Running -> Waiting on each batch,
/// Waiting -> Dying -> Dead on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Waiting,
    Running,
    Dying,
    Dead,
}

/// Type-erased view of one batch of jobs.
///
/// `call(ctx, i)` invokes the caller's delegate on job `i`. The pointers are
/// only dereferenced between batch dispatch and the batch draining, during
/// which the dispatching `run()` call is blocked and its borrows live.
#[derive(Clone, Copy)]
struct RawBatch {
    call: unsafe fn(*const (), usize),
    ctx: *const (),
    /// Index of the first job in this batch
    base: usize,
    /// Number of jobs in this batch (at most the number of workers)
    count: usize,
}

// The raw pointers are confined by the run()-blocks-until-drained protocol.
unsafe impl Send for RawBatch {}

struct PoolState {
    states: Vec<WorkerState>,
    batch: Option<RawBatch>,
    /// Jobs in the current batch still to complete
    remaining: usize,
    /// One capture slot per worker; the first non-empty slot is rethrown
    panics: Vec<Option<Box<dyn Any + Send>>>,
}

struct Shared {
    state: Mutex<PoolState>,
    cv: Condvar,
}

/// A pool of reusable worker threads executing a delegate over job payloads
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<Option<JoinHandle<()>>>,
    threads: usize,
}

impl WorkerPool {
    /// Create a pool of `num_threads` workers
    ///
    /// # Arguments
    /// * `num_threads` - Number of worker threads. 0 selects the
    ///   platform-reported hardware parallelism.
    pub fn new(num_threads: usize) -> Self {
        let threads = if num_threads == 0 {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            num_threads
        };

        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                states: vec![WorkerState::Waiting; threads],
                batch: None,
                remaining: 0,
                panics: (0..threads).map(|_| None).collect(),
            }),
            cv: Condvar::new(),
        });

        let workers = (0..threads)
            .map(|id| {
                let shared = Arc::clone(&shared);
                Some(
                    thread::Builder::new()
                        .name(format!("worker-pool-{}", id))
                        .spawn(move || worker_loop(id, shared))
                        .expect("failed to spawn worker thread"),
                )
            })
            .collect();

        Self {
            shared,
            workers,
            threads,
        }
    }

    /// Number of worker threads in this pool
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `delegate` once per element of `params`, in parallel
    ///
    /// Jobs are dispatched in batches of at most `threads()`; a batch's
    /// completion strictly happens-before the dispatch of the next batch.
    /// There is no ordering guarantee between invocations within a batch.
    ///
    /// If any invocation panics, the worker captures the payload, finishes
    /// the batch, and `run` rethrows the first captured payload. Captures
    /// are cleared before each new batch.
    pub fn run<T: Send>(&self, delegate: &(dyn Fn(&mut T) + Sync), params: &mut [T]) {
        struct Ctx<'a, T> {
            delegate: &'a (dyn Fn(&mut T) + Sync),
            params: *mut T,
        }

        unsafe fn trampoline<T>(ctx: *const (), index: usize) {
            let ctx = &*(ctx as *const Ctx<'_, T>);
            (ctx.delegate)(&mut *ctx.params.add(index));
        }

        let jobs = params.len();
        let ctx = Ctx {
            delegate,
            params: params.as_mut_ptr(),
        };

        let mut st = self.shared.state.lock().unwrap();
        // Clear captures left over from an earlier run before anything
        // can rethrow them
        for slot in st.panics.iter_mut() {
            *slot = None;
        }

        let mut next = 0;
        while next < jobs {
            st = self.drain_and_raise(st);

            let count = (jobs - next).min(self.threads);
            for slot in st.panics.iter_mut() {
                *slot = None;
            }
            st.batch = Some(RawBatch {
                call: trampoline::<T>,
                ctx: &ctx as *const Ctx<'_, T> as *const (),
                base: next,
                count,
            });
            for state in st.states.iter_mut().take(count) {
                *state = WorkerState::Running;
            }
            st.remaining = count;
            drop(st);
            self.shared.cv.notify_all();

            next += count;
            st = self.shared.state.lock().unwrap();
        }
        drop(self.drain_and_raise(st));
    }

    /// Wait for the current batch to drain, then rethrow the first
    /// captured panic, if any.
    fn drain_and_raise<'a>(&self, guard: MutexGuard<'a, PoolState>) -> MutexGuard<'a, PoolState> {
        let mut st = self
            .shared
            .cv
            .wait_while(guard, |s| s.remaining > 0)
            .unwrap();
        if let Some(payload) = st.panics.iter_mut().find_map(|slot| slot.take()) {
            drop(st);
            panic::resume_unwind(payload);
        }
        st
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let guard = self.shared.state.lock().unwrap();
            let mut st = self
                .shared
                .cv
                .wait_while(guard, |s| s.remaining > 0)
                .unwrap();
            for state in st.states.iter_mut() {
                *state = WorkerState::Dying;
            }
            st.remaining = self.threads;
        }
        self.shared.cv.notify_all();
        for worker in self.workers.iter_mut() {
            if let Some(handle) = worker.take() {
                // A worker that panicked outside a delegate is already
                // accounted for; surface nothing further here.
                let _ = handle.join();
            }
        }
    }
}

fn worker_loop(id: usize, shared: Arc<Shared>) {
    loop {
        let batch = {
            let guard = shared.state.lock().unwrap();
            let mut st = shared
                .cv
                .wait_while(guard, |s| s.states[id] == WorkerState::Waiting)
                .unwrap();
            if st.states[id] == WorkerState::Dying {
                st.states[id] = WorkerState::Dead;
                st.remaining -= 1;
                drop(st);
                shared.cv.notify_all();
                return;
            }
            st.batch.expect("running worker without a dispatched batch")
        };

        // Run this worker's job outside the lock; capture any panic.
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            // SAFETY: the dispatching run() call blocks until `remaining`
            // reaches zero, so the delegate and payload pointers in `batch`
            // outlive this invocation. Each worker id touches only job
            // `base + id`, so payload access is disjoint.
            unsafe { (batch.call)(batch.ctx, batch.base + id) }
        }));

        let mut st = shared.state.lock().unwrap();
        if let Err(payload) = result {
            st.panics[id] = Some(payload);
        }
        st.states[id] = WorkerState::Waiting;
        st.remaining -= 1;
        drop(st);
        shared.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_pool_reports_thread_count() {
        let pool = WorkerPool::new(4);
        assert_eq!(pool.threads(), 4);

        let pool = WorkerPool::new(0);
        assert!(pool.threads() >= 1, "auto thread count should be positive");
    }

    #[test]
    fn test_run_invokes_delegate_once_per_job() {
        let pool = WorkerPool::new(4);
        let mut counters = vec![0u32; 10];

        pool.run(&|c: &mut u32| *c += 1, &mut counters);

        assert_eq!(counters, vec![1; 10], "each job should run exactly once");
    }

    #[test]
    fn test_run_batches_when_jobs_exceed_threads() {
        let pool = WorkerPool::new(2);
        let concurrent = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let mut jobs = vec![(); 9];

        pool.run(
            &|_: &mut ()| {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(2));
                concurrent.fetch_sub(1, Ordering::SeqCst);
            },
            &mut jobs,
        );

        assert!(
            peak.load(Ordering::SeqCst) <= 2,
            "no more than `threads` jobs may run concurrently"
        );
    }

    #[test]
    fn test_run_with_no_jobs_returns_immediately() {
        let pool = WorkerPool::new(3);
        let mut empty: Vec<u32> = Vec::new();
        pool.run(&|_: &mut u32| unreachable!(), &mut empty);
    }

    #[test]
    fn test_panic_is_rethrown_and_pool_survives() {
        let pool = WorkerPool::new(2);
        let mut jobs: Vec<usize> = (0..6).collect();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            pool.run(
                &|j: &mut usize| {
                    if *j == 3 {
                        panic!("job {} failed", j);
                    }
                },
                &mut jobs,
            );
        }));
        assert!(outcome.is_err(), "run should rethrow the captured panic");

        // The pool must remain usable for subsequent batches.
        let mut counters = vec![0u32; 4];
        pool.run(&|c: &mut u32| *c += 1, &mut counters);
        assert_eq!(counters, vec![1; 4]);
    }

    #[test]
    fn test_threads_are_reused_across_runs() {
        let pool = WorkerPool::new(3);
        let mut seen = vec![String::new(); 3];

        for _ in 0..4 {
            pool.run(
                &|name: &mut String| {
                    *name = thread::current().name().unwrap_or("").to_string();
                },
                &mut seen,
            );
            for name in &seen {
                assert!(
                    name.starts_with("worker-pool-"),
                    "jobs should run on pool threads, got {:?}",
                    name
                );
            }
        }
    }
}
