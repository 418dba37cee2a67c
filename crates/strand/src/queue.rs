// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Execution queues.
//!
//! A `Queue` is a submission target: the main queue, one global queue per
//! priority, or a custom serial/concurrent queue. Custom queues keep their
//! own ordering state and hand ready jobs to the global pool of their
//! priority; global queues go straight to the pool.
//!
//! Caller hazard: `submit_sync` (and `barrier_sync`) onto the serial queue
//! the caller is currently running on never returns. The queue is busy
//! with the caller, so the submitted job can't start.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};

use crate::config::QueueConfig;
use crate::runtime::{self, Job, Pool};
use crate::sync::Lock;
use crate::time::Delay;
use crate::work_item::WorkItem;

/// How a queue runs the jobs submitted to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discipline {
    /// One job at a time, in submission order.
    Serial,
    /// Jobs run in parallel, started in submission order.
    Concurrent,
}

/// Scheduling class. Each class has its own worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Priority {
    UserInteractive,
    #[default]
    UserInitiated,
    Utility,
    Background,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::UserInteractive,
        Priority::UserInitiated,
        Priority::Utility,
        Priority::Background,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Priority::UserInteractive => "user-interactive",
            Priority::UserInitiated => "user-initiated",
            Priority::Utility => "utility",
            Priority::Background => "background",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueKind {
    Main,
    Global,
    Custom,
}

/// Handle to an execution queue. Cloning shares the queue.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    label: String,
    discipline: Discipline,
    priority: Priority,
    kind: QueueKind,
    state: Lock<QueueState>,
}

/// Ordering state for main and custom queues. Global queues leave it unused.
#[derive(Default)]
struct QueueState {
    pending: VecDeque<Pending>,
    running: usize,
    barrier_active: bool,
}

struct Pending {
    job: Job,
    barrier: bool,
}

impl Queue {
    /// The distinguished serial queue served by the runtime's main thread.
    ///
    /// # Panics
    ///
    /// The first call into any queue starts the runtime, and panics if the
    /// OS refuses to spawn its threads. Call [`configure`] up front to
    /// take that hit at a known point.
    ///
    /// [`configure`]: crate::runtime::configure
    pub fn main() -> Queue {
        runtime::get().main_queue().clone()
    }

    /// Concurrent queue backed directly by the pool for `priority`.
    ///
    /// # Panics
    ///
    /// Same as [`Queue::main`] when this call starts the runtime.
    pub fn global(priority: Priority) -> Queue {
        runtime::get().global_queue(priority).clone()
    }

    pub fn user_interactive() -> Queue {
        Self::global(Priority::UserInteractive)
    }

    pub fn user_initiated() -> Queue {
        Self::global(Priority::UserInitiated)
    }

    pub fn utility() -> Queue {
        Self::global(Priority::Utility)
    }

    pub fn background() -> Queue {
        Self::global(Priority::Background)
    }

    /// New queue with the default priority.
    pub fn custom(label: impl Into<String>, discipline: Discipline) -> Queue {
        Self::with_config(QueueConfig::new(label).discipline(discipline))
    }

    pub fn with_config(config: QueueConfig) -> Queue {
        Self::build(config.label, config.discipline, config.priority, QueueKind::Custom)
    }

    pub(crate) fn new_main() -> Queue {
        Self::build(
            "main".to_string(),
            Discipline::Serial,
            Priority::UserInteractive,
            QueueKind::Main,
        )
    }

    pub(crate) fn new_global(priority: Priority) -> Queue {
        Self::build(
            format!("global.{}", priority.name()),
            Discipline::Concurrent,
            priority,
            QueueKind::Global,
        )
    }

    fn build(label: String, discipline: Discipline, priority: Priority, kind: QueueKind) -> Queue {
        Queue {
            inner: Arc::new(QueueInner {
                label,
                discipline,
                priority,
                kind,
                state: Lock::new(QueueState::default()),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn discipline(&self) -> Discipline {
        self.inner.discipline
    }

    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    pub fn is_main(&self) -> bool {
        self.inner.kind == QueueKind::Main
    }

    /// Enqueue `f` and return immediately.
    pub fn submit_async<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Box::new(f), false);
    }

    /// Run `f` on this queue and block until it returns its value.
    ///
    /// A panic inside `f` is re-raised on the calling thread. Called from
    /// a runtime worker, the worker's pool starts a replacement thread
    /// while this one waits, so `f` never starves behind it.
    pub fn submit_sync<T, F>(&self, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.run_blocking(f, false)
    }

    /// Enqueue `f` to run no earlier than `delay` from now. A zero delay
    /// is the same as [`submit_async`](Self::submit_async).
    pub fn submit_after<F>(&self, delay: impl Into<Delay>, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue_after(delay.into(), Box::new(f));
    }

    /// Enqueue `f` as a barrier. On a custom concurrent queue it starts once
    /// every earlier job has finished and nothing later starts until it
    /// returns. Elsewhere it is an ordinary submission.
    pub fn barrier_async<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Box::new(f), true);
    }

    /// Blocking form of [`barrier_async`](Self::barrier_async).
    pub fn barrier_sync<T, F>(&self, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.run_blocking(f, true)
    }

    /// Submit an existing work item. It runs unless cancelled first.
    pub fn submit_item(&self, item: &WorkItem) {
        let item = item.clone();
        self.enqueue(Box::new(move || item.perform()), false);
    }

    /// Submit an existing work item no earlier than `delay` from now.
    pub fn submit_item_after(&self, delay: impl Into<Delay>, item: &WorkItem) {
        let item = item.clone();
        self.enqueue_after(delay.into(), Box::new(move || item.perform()));
    }

    fn run_blocking<T, F>(&self, f: F, barrier: bool) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.enqueue(
            Box::new(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(f));
                let _ = tx.send(result);
            }),
            barrier,
        );
        match runtime::block_in_place(|| rx.recv()) {
            Ok(Ok(value)) => value,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            // The job was dropped without running: its pool is gone.
            Err(_) => panic!("queue `{}` dropped a synchronous job", self.label()),
        }
    }

    pub(crate) fn enqueue_after(&self, delay: Delay, job: Job) {
        if delay.is_zero() {
            self.enqueue(job, false);
            return;
        }
        let queue = self.clone();
        runtime::get()
            .timer()
            .schedule(delay.deadline(), Box::new(move || queue.enqueue(job, false)));
    }

    pub(crate) fn enqueue(&self, job: Job, barrier: bool) {
        if self.inner.kind == QueueKind::Global {
            self.target().spawn(job);
            return;
        }
        let ready = self.inner.state.with(|state| {
            state.pending.push_back(Pending { job, barrier });
            self.take_ready(state)
        });
        for pending in ready {
            self.launch(pending);
        }
    }

    /// Max jobs in flight at once.
    fn width(&self) -> usize {
        match self.inner.discipline {
            Discipline::Serial => 1,
            Discipline::Concurrent => usize::MAX,
        }
    }

    /// Pop every job allowed to start now and account for it as running.
    fn take_ready(&self, state: &mut QueueState) -> Vec<Pending> {
        let mut ready = Vec::new();
        while let Some(front) = state.pending.front() {
            if state.barrier_active {
                break;
            }
            if front.barrier {
                if state.running > 0 {
                    break;
                }
                state.barrier_active = true;
            } else if state.running >= self.width() {
                break;
            } else {
                state.running += 1;
            }
            if let Some(pending) = state.pending.pop_front() {
                let barrier = pending.barrier;
                ready.push(pending);
                if barrier {
                    break;
                }
            }
        }
        ready
    }

    fn launch(&self, pending: Pending) {
        let finish = Finish {
            queue: self.clone(),
            barrier: pending.barrier,
        };
        let job = pending.job;
        self.target().spawn(Box::new(move || {
            // Dropped after `job`, even if it panics.
            let _finish = finish;
            job();
        }));
    }

    fn finish(&self, barrier: bool) {
        let ready = self.inner.state.with(|state| {
            if barrier {
                state.barrier_active = false;
            } else {
                state.running -= 1;
            }
            self.take_ready(state)
        });
        for pending in ready {
            self.launch(pending);
        }
    }

    fn target(&self) -> &'static Pool {
        let rt = runtime::get();
        match self.inner.kind {
            QueueKind::Main => rt.main_pool(),
            QueueKind::Global | QueueKind::Custom => rt.pool(self.inner.priority),
        }
    }
}

/// Releases a queue slot when a launched job ends.
struct Finish {
    queue: Queue,
    barrier: bool,
}

impl Drop for Finish {
    fn drop(&mut self) {
        self.queue.finish(self.barrier);
    }
}

impl PartialEq for Queue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Queue {}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("label", &self.inner.label)
            .field("discipline", &self.inner.discipline)
            .field("priority", &self.inner.priority)
            .finish()
    }
}
