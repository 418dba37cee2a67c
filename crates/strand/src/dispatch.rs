// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Chained dispatch.
//!
//! A [`Dispatch`] is one link of a linear pipeline. It owns a single
//! [`WorkItem`]; every `then_*` call creates the next item, registers it
//! as a dependent of this one, and returns a new link for it:
//!
//! ```no_run
//! use strand::{Dispatch, Queue};
//!
//! Dispatch::run_async(&Queue::utility(), || println!("load"))
//!     .then_after(0.5, &Queue::utility(), || println!("parse"))
//!     .then_async_main(|| println!("show"));
//! ```
//!
//! `cancel`, `wait` and `wait_timeout` act on the link's own item only.
//! Cancelling a link never reaches earlier links, and later links are
//! only affected in that a cancelled item never notifies its dependents.

use std::sync::Arc;
use std::time::Instant;

use crate::group::CompletionGroup;
use crate::queue::{Priority, Queue};
use crate::runtime;
use crate::semaphore::CountingSemaphore;
use crate::time::{self, Delay, WaitResult};
use crate::work_item::{ItemState, WorkItem};

#[derive(Debug, Clone)]
pub struct Dispatch {
    item: WorkItem,
}

// Pipeline heads.
impl Dispatch {
    /// Submit `f` to `queue` and start a pipeline with it.
    pub fn run_async<F>(queue: &Queue, f: F) -> Dispatch
    where
        F: FnOnce() + Send + 'static,
    {
        let item = WorkItem::new(f);
        queue.submit_item(&item);
        Dispatch { item }
    }

    /// Run `f` on `queue`, blocking until it returns, and start a pipeline
    /// with it. Same hazard as [`Queue::submit_sync`].
    pub fn run_sync<F>(queue: &Queue, f: F) -> Dispatch
    where
        F: FnOnce() + Send + 'static,
    {
        let item = WorkItem::new(f);
        let runner = item.clone();
        queue.submit_sync(move || runner.perform());
        Dispatch { item }
    }

    /// Submit `f` to `queue` after `delay` and start a pipeline with it.
    pub fn run_after<F>(delay: impl Into<Delay>, queue: &Queue, f: F) -> Dispatch
    where
        F: FnOnce() + Send + 'static,
    {
        let item = WorkItem::new(f);
        queue.submit_item_after(delay, &item);
        Dispatch { item }
    }

    pub fn async_main<F>(f: F) -> Dispatch
    where
        F: FnOnce() + Send + 'static,
    {
        Self::run_async(&Queue::main(), f)
    }

    pub fn sync_main<F>(f: F) -> Dispatch
    where
        F: FnOnce() + Send + 'static,
    {
        Self::run_sync(&Queue::main(), f)
    }

    pub fn after_main<F>(delay: impl Into<Delay>, f: F) -> Dispatch
    where
        F: FnOnce() + Send + 'static,
    {
        Self::run_after(delay, &Queue::main(), f)
    }

    pub fn async_global<F>(priority: Priority, f: F) -> Dispatch
    where
        F: FnOnce() + Send + 'static,
    {
        Self::run_async(&Queue::global(priority), f)
    }
}

// Chaining.
impl Dispatch {
    /// Submit `f` to `queue` once this link completes.
    pub fn then_async<F>(&self, queue: &Queue, f: F) -> Dispatch
    where
        F: FnOnce() + Send + 'static,
    {
        let next = WorkItem::new(f);
        self.item.notify(queue, next.clone());
        Dispatch { item: next }
    }

    /// Once this link completes, run `f` synchronously on `queue`.
    ///
    /// The blocking call is made from a worker of `queue`'s priority pool
    /// rather than from the thread that completed this link; that thread
    /// may still hold `queue` (when both links share a serial queue) and
    /// would deadlock. The pool covers each waiting worker with a fresh
    /// thread, so any number of `then_sync` links can wait on the same
    /// pool. The returned link completes after `f` returns.
    pub fn then_sync<F>(&self, queue: &Queue, f: F) -> Dispatch
    where
        F: FnOnce() + Send + 'static,
    {
        let target = queue.clone();
        let next = WorkItem::new(move || target.submit_sync(f));
        self.item
            .notify(&Queue::global(queue.priority()), next.clone());
        Dispatch { item: next }
    }

    /// Once this link completes, wait `delay`, then submit `f` to `queue`.
    ///
    /// The returned link tracks `f` itself, not the timer: it reports
    /// completion only after `f` has run.
    pub fn then_after<F>(&self, delay: impl Into<Delay>, queue: &Queue, f: F) -> Dispatch
    where
        F: FnOnce() + Send + 'static,
    {
        let delay = delay.into();
        let next = WorkItem::new(f);
        let target = queue.clone();
        let deferred = next.clone();
        let arm = WorkItem::new(move || target.submit_item_after(delay, &deferred));
        self.item.notify(queue, arm);
        Dispatch { item: next }
    }

    pub fn then_async_main<F>(&self, f: F) -> Dispatch
    where
        F: FnOnce() + Send + 'static,
    {
        self.then_async(&Queue::main(), f)
    }

    pub fn then_sync_main<F>(&self, f: F) -> Dispatch
    where
        F: FnOnce() + Send + 'static,
    {
        self.then_sync(&Queue::main(), f)
    }

    pub fn then_after_main<F>(&self, delay: impl Into<Delay>, f: F) -> Dispatch
    where
        F: FnOnce() + Send + 'static,
    {
        self.then_after(delay, &Queue::main(), f)
    }

    pub fn then_async_global<F>(&self, priority: Priority, f: F) -> Dispatch
    where
        F: FnOnce() + Send + 'static,
    {
        self.then_async(&Queue::global(priority), f)
    }
}

// Link control. Local to this link.
impl Dispatch {
    pub fn cancel(&self) {
        self.item.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.item.is_cancelled()
    }

    pub fn state(&self) -> ItemState {
        self.item.state()
    }

    pub fn wait(&self) -> WaitResult {
        self.item.wait()
    }

    pub fn wait_timeout(&self, timeout: impl Into<Delay>) -> WaitResult {
        self.item.wait_timeout(timeout)
    }

    pub fn work_item(&self) -> &WorkItem {
        &self.item
    }
}

// Non-chainable helpers.
impl Dispatch {
    pub fn barrier_async<F>(queue: &Queue, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        queue.barrier_async(f);
    }

    pub fn barrier_sync<T, F>(queue: &Queue, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        queue.barrier_sync(f)
    }

    /// Run `f(i)` for every `i` in `0..iterations` on `queue` and block
    /// until all calls have returned. Calling this from a job already
    /// running on a serial `queue` deadlocks.
    pub fn apply<F>(iterations: usize, queue: &Queue, f: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let group = CompletionGroup::new();
        for i in 0..iterations {
            let f = f.clone();
            group.run_async(queue, move || f(i));
        }
        let done = runtime::block_in_place(|| group.wait());
        debug_assert!(done.is_success());
    }

    /// Deadline `delay` from now.
    pub fn time(delay: impl Into<Delay>) -> Instant {
        time::deadline(delay)
    }

    pub fn group() -> CompletionGroup {
        CompletionGroup::new()
    }

    pub fn semaphore(value: usize) -> CountingSemaphore {
        CountingSemaphore::new(value)
    }
}

impl From<WorkItem> for Dispatch {
    fn from(item: WorkItem) -> Self {
        Dispatch { item }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Discipline;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;

    #[test]
    fn async_chain_runs_in_order() {
        let q = Queue::custom("test.chain", Discipline::Concurrent);
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (log.clone(), log.clone(), log.clone());
        let last = Dispatch::run_async(&q, move || {
            std::thread::sleep(Duration::from_millis(20));
            a.lock().unwrap().push(1);
        })
        .then_async(&q, move || b.lock().unwrap().push(2))
        .then_async(&q, move || c.lock().unwrap().push(3));
        assert!(last.wait_timeout(5.0).is_success());
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn chaining_returns_new_link() {
        let first = Dispatch::run_async(&Queue::utility(), || {});
        let second = first.then_async(&Queue::utility(), || {});
        assert!(second.wait_timeout(5.0).is_success());
        assert!(first.wait_timeout(5.0).is_success());
        assert_eq!(first.state(), ItemState::Completed);
        assert_eq!(second.state(), ItemState::Completed);
    }

    #[test]
    fn then_after_respects_delay() {
        let (tx, rx) = mpsc::channel();
        let link = Dispatch::run_async(&Queue::utility(), move || tx.send(Instant::now()).unwrap())
            .then_after(Duration::from_millis(40), &Queue::utility(), || {});
        let parent_done = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(link.wait_timeout(5.0).is_success());
        assert!(parent_done.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn then_after_link_tracks_task_not_timer() {
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        let link = Dispatch::run_async(&Queue::utility(), || {}).then_after(
            0.02,
            &Queue::utility(),
            move || {
                std::thread::sleep(Duration::from_millis(30));
                r.store(true, Ordering::SeqCst);
            },
        );
        assert!(link.wait_timeout(5.0).is_success());
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn then_sync_on_same_serial_queue() {
        let q = Queue::custom("test.sync.serial", Discipline::Serial);
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (log.clone(), log.clone());
        let link = Dispatch::run_async(&q, move || a.lock().unwrap().push("first"))
            .then_sync(&q, move || b.lock().unwrap().push("second"));
        assert!(link.wait_timeout(5.0).is_success());
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn then_sync_fan_out_beyond_pool_size() {
        let q = Queue::custom("test.sync.fan", Discipline::Concurrent);
        let width = runtime::get().pool(q.priority()).size() + 1;
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let head = Dispatch::run_async(&q, move || {
            release_rx.recv().unwrap();
        });
        let ran = Arc::new(AtomicUsize::new(0));
        let links: Vec<_> = (0..width)
            .map(|_| {
                let ran = ran.clone();
                head.then_sync(&q, move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        release_tx.send(()).unwrap();
        for link in &links {
            assert!(link.wait_timeout(5.0).is_success());
        }
        assert_eq!(ran.load(Ordering::SeqCst), width);
    }

    #[test]
    fn apply_from_worker_does_not_starve_pool() {
        let q = Queue::utility();
        let width = runtime::get().pool(q.priority()).size() + 1;
        let seen = Arc::new(AtomicUsize::new(0));
        // Every worker ends up waiting inside `apply` at once.
        let outers: Vec<_> = (0..width)
            .map(|_| {
                let s = seen.clone();
                Dispatch::run_async(&q, move || {
                    Dispatch::apply(2, &Queue::utility(), move |_| {
                        s.fetch_add(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();
        for outer in &outers {
            assert!(outer.wait_timeout(5.0).is_success());
        }
        assert_eq!(seen.load(Ordering::SeqCst), width * 2);
    }

    #[test]
    fn run_sync_blocks_until_done() {
        let done = Arc::new(AtomicBool::new(false));
        let d = done.clone();
        let link = Dispatch::run_sync(&Queue::user_initiated(), move || {
            std::thread::sleep(Duration::from_millis(10));
            d.store(true, Ordering::SeqCst);
        });
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(link.state(), ItemState::Completed);
    }

    #[test]
    fn cancelled_link_is_skipped_and_breaks_chain() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let head = Dispatch::run_async(&Queue::utility(), move || {
            release_rx.recv().unwrap();
        });
        let ran = Arc::new(AtomicUsize::new(0));
        let (r1, r2) = (ran.clone(), ran.clone());
        let middle = head.then_async(&Queue::utility(), move || {
            r1.fetch_add(1, Ordering::SeqCst);
        });
        let tail = middle.then_async(&Queue::utility(), move || {
            r2.fetch_add(10, Ordering::SeqCst);
        });
        middle.cancel();
        release_tx.send(()).unwrap();

        assert!(head.wait_timeout(5.0).is_success());
        assert_eq!(head.state(), ItemState::Completed);
        assert!(middle.wait_timeout(5.0).is_success());
        assert_eq!(middle.state(), ItemState::Cancelled);
        // Not cancelled itself, but never scheduled.
        assert!(tail.wait_timeout(0.05).is_timed_out());
        assert!(!tail.is_cancelled());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancelling_delayed_link_before_timer_fires() {
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        let link = Dispatch::run_after(0.05, &Queue::utility(), move || r.store(true, Ordering::SeqCst));
        link.cancel();
        std::thread::sleep(Duration::from_millis(100));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(link.state(), ItemState::Cancelled);
    }

    #[test]
    fn apply_visits_every_index() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        Dispatch::apply(16, &Queue::utility(), move |i| s.lock().unwrap().push(i));
        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn apply_with_zero_iterations_returns() {
        Dispatch::apply(0, &Queue::utility(), |_| unreachable!());
    }

    #[test]
    fn global_shortcuts_use_priority_pool() {
        let (tx, rx) = mpsc::channel();
        Dispatch::async_global(Priority::Background, move || {
            tx.send(crate::runtime::current_priority()).unwrap()
        });
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Priority::Background
        );
    }

    #[test]
    fn main_shortcuts_run_on_main_queue() {
        let (tx, rx) = mpsc::channel();
        let link = Dispatch::async_main(|| {}).then_async_main(move || {
            tx.send(std::thread::current().name().map(str::to_string)).unwrap();
        });
        assert!(link.wait_timeout(5.0).is_success());
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(name.unwrap().ends_with("-main"));
    }

    #[test]
    fn time_converts_delay() {
        let before = Instant::now();
        assert!(Dispatch::time(1.0) >= before + Duration::from_secs(1));
    }
}
