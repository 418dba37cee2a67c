// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Worker pool.
//!
//! One shared FIFO behind a monitor; idle workers park on the condvar.
//! Each pool serves exactly one priority class and stamps that class on
//! its threads so work items created there inherit it.
//!
//! Pools are elastic around blocking calls. A worker that blocks through
//! [`block_in_place`] no longer counts toward the pool's capacity, and a
//! replacement thread is started if needed, so the job it waits for can
//! still run. Once the blocked call returns, surplus threads retire the
//! next time they find the queue empty.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, error, warn};

use super::{set_current_priority, Job};
use crate::config::RuntimeConfig;
use crate::queue::Priority;
use crate::sync::{Lock, Monitor};

pub(crate) struct Pool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    name: String,
    priority: Priority,
    /// Threads that should be runnable at any time.
    size: usize,
    elastic: bool,
    config: RuntimeConfig,
    state: Monitor<PoolState>,
    handles: Lock<Vec<JoinHandle<()>>>,
}

#[derive(Default)]
struct PoolState {
    jobs: VecDeque<Job>,
    shutdown: bool,
    /// Live worker threads, blocked ones included.
    threads: usize,
    /// Workers currently inside `block_in_place`.
    blocked: usize,
    next_id: usize,
}

impl PoolState {
    fn surplus(&self, size: usize) -> bool {
        self.threads - self.blocked > size
    }
}

thread_local! {
    static CURRENT_POOL: RefCell<Option<Arc<PoolShared>>> = const { RefCell::new(None) };
}

impl Pool {
    /// Start `workers` threads named `<name>-<n>` (or just `<name>` for a
    /// single-thread pool). The pool compensates for blocked workers.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to start the initial threads.
    pub fn new(name: &str, priority: Priority, workers: usize, config: &RuntimeConfig) -> Self {
        Self::start(name, priority, workers, config, true)
    }

    /// Like [`new`](Self::new), but never grows past `workers` threads.
    pub fn fixed(name: &str, priority: Priority, workers: usize, config: &RuntimeConfig) -> Self {
        Self::start(name, priority, workers, config, false)
    }

    fn start(
        name: &str,
        priority: Priority,
        workers: usize,
        config: &RuntimeConfig,
        elastic: bool,
    ) -> Self {
        let size = workers.max(1);
        let shared = Arc::new(PoolShared {
            name: name.to_string(),
            priority,
            size,
            elastic,
            config: config.clone(),
            state: Monitor::new(PoolState {
                threads: size,
                next_id: size,
                ..PoolState::default()
            }),
            handles: Lock::new(Vec::with_capacity(size)),
        });

        for id in 0..size {
            let thread_name = if size == 1 {
                name.to_string()
            } else {
                format!("{}-{}", name, id)
            };
            let handle = shared
                .spawn_thread(thread_name)
                .expect("failed to spawn worker thread");
            shared.handles.lock().push(handle);
        }
        debug!("pool {} started with {} workers", name, size);

        Self { shared }
    }

    /// Queue a job for any idle worker.
    pub fn spawn(&self, job: Job) {
        let accepted = self.shared.state.with(|state| {
            if state.shutdown {
                return false;
            }
            state.jobs.push_back(job);
            true
        });
        if accepted {
            self.shared.state.notify_one();
        } else {
            warn!("pool {} is shut down; job dropped", self.shared.name);
        }
    }

    /// Live worker threads, including blocked and not yet retired ones.
    #[cfg(test)]
    pub fn size(&self) -> usize {
        self.shared.state.with(|state| state.threads)
    }

    /// Stop accepting jobs, let workers drain what is queued, then join them.
    pub fn shutdown(&self) {
        self.shared.state.with(|state| state.shutdown = true);
        self.shared.state.notify_all();

        // A replacement thread may register while we join; keep going
        // until the list stays empty.
        loop {
            let handles = std::mem::take(&mut *self.shared.handles.lock());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl PoolShared {
    fn spawn_thread(self: &Arc<Self>, name: String) -> std::io::Result<JoinHandle<()>> {
        let shared = self.clone();
        self.config
            .thread_builder(name)
            .spawn(move || worker_loop(shared))
    }

    /// Account for the calling worker blocking and start a replacement
    /// when the pool would otherwise drop below its size.
    fn enter_blocking(self: &Arc<Self>) {
        let grow = self.state.with(|state| {
            state.blocked += 1;
            if state.shutdown || state.threads - state.blocked >= self.size {
                return None;
            }
            state.threads += 1;
            state.next_id += 1;
            Some(state.next_id - 1)
        });
        let Some(id) = grow else {
            return;
        };
        match self.spawn_thread(format!("{}-{}", self.name, id)) {
            Ok(handle) => {
                debug!("pool {} grew to cover a blocked worker", self.name);
                let mut handles = self.handles.lock();
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
            }
            Err(err) => {
                error!("pool {} could not add a worker: {}", self.name, err);
                self.state.with(|state| state.threads -= 1);
            }
        }
    }

    fn leave_blocking(&self) {
        self.state.with(|state| state.blocked -= 1);
    }
}

/// Run `f`, which may block waiting on other jobs, without starving the
/// pool the calling thread belongs to. Outside an elastic pool this is
/// just `f()`.
pub(crate) fn block_in_place<R, F: FnOnce() -> R>(f: F) -> R {
    let current = CURRENT_POOL.with(|cell| cell.borrow().clone());
    let Some(shared) = current.filter(|shared| shared.elastic) else {
        return f();
    };
    shared.enter_blocking();
    let _unblock = Unblock(&shared);
    f()
}

struct Unblock<'a>(&'a PoolShared);

impl Drop for Unblock<'_> {
    fn drop(&mut self) {
        self.0.leave_blocking();
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    set_current_priority(shared.priority);
    CURRENT_POOL.with(|cell| *cell.borrow_mut() = Some(shared.clone()));
    debug!("worker {:?} up", std::thread::current().name());

    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    break Some(job);
                }
                if state.shutdown || state.surplus(shared.size) {
                    state.threads -= 1;
                    break None;
                }
                state = shared.state.park(state, None);
            }
        };
        match job {
            Some(job) => run_job(&shared.name, job),
            // Shut down and drained, or no longer needed.
            None => break,
        }
    }

    CURRENT_POOL.with(|cell| cell.borrow_mut().take());
    debug!("worker {:?} down", std::thread::current().name());
}

/// Run one job, keeping the worker alive if it panics.
fn run_job(pool: &str, job: Job) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        error!("job on pool {} panicked: {}", pool, panic_message(&*payload));
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
