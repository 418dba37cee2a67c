// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Completion group: a join point over outstanding work.
//!
//! The group counts `enter`s minus `leave`s. Whenever the count drops to
//! zero, every registered notification is submitted to its queue and
//! waiters wake. Clones share one group.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::trace;

use crate::queue::Queue;
use crate::runtime::Job;
use crate::sync::Monitor;
use crate::time::{Delay, WaitResult};

#[derive(Clone)]
pub struct CompletionGroup {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    state: Monitor<GroupState>,
    /// Set by `enter_once`, cleared by the first `leave_once`.
    once: AtomicBool,
}

#[derive(Default)]
struct GroupState {
    outstanding: usize,
    notifications: Vec<(Queue, Job)>,
}

impl CompletionGroup {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GroupInner {
                state: Monitor::new(GroupState::default()),
                once: AtomicBool::new(false),
            }),
        }
    }

    /// Count one more piece of outstanding work.
    pub fn enter(&self) {
        self.inner.state.with(|state| state.outstanding += 1);
    }

    /// Mark one piece of outstanding work done.
    ///
    /// # Panics
    ///
    /// If the group has nothing outstanding. Balancing enters and leaves
    /// is the caller's job.
    pub fn leave(&self) {
        let fired = self.inner.state.with(|state| {
            assert!(
                state.outstanding > 0,
                "CompletionGroup::leave called more times than enter"
            );
            state.outstanding -= 1;
            if state.outstanding == 0 {
                Some(std::mem::take(&mut state.notifications))
            } else {
                None
            }
        });
        if let Some(notifications) = fired {
            self.inner.state.notify_all();
            for (queue, job) in notifications {
                queue.enqueue(job, false);
            }
        }
    }

    /// `enter`, and arm the single-shot guard for [`leave_once`](Self::leave_once).
    pub fn enter_once(&self) {
        self.enter();
        self.inner.once.store(true, Ordering::Release);
    }

    /// Leave if the guard armed by `enter_once` is still set.
    ///
    /// Safe to call any number of times from any thread; only the first
    /// call after `enter_once` leaves. Returns whether this call did.
    pub fn leave_once(&self) -> bool {
        if self
            .inner
            .once
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.leave();
        true
    }

    /// Submit `f` to `queue` as part of the group: enters now, leaves when
    /// `f` returns or panics. Returns the group for further fan-out.
    pub fn run_async<F>(&self, queue: &Queue, f: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.enter();
        let member = Member(self.clone());
        queue.submit_async(move || {
            let _member = member;
            f();
        });
        self
    }

    /// Submit `f` to `queue` once the group is empty.
    ///
    /// Fires exactly once. If nothing is outstanding right now, `f` is
    /// submitted immediately.
    pub fn notify<F>(&self, queue: &Queue, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(f);
        let now = self.inner.state.with(|state| {
            if state.outstanding == 0 {
                Some(job)
            } else {
                state.notifications.push((queue.clone(), job));
                None
            }
        });
        if let Some(job) = now {
            trace!("group already empty; notifying immediately");
            queue.enqueue(job, false);
        }
    }

    /// Block until nothing is outstanding.
    pub fn wait(&self) -> WaitResult {
        self.wait_until(None)
    }

    /// Block until nothing is outstanding or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: impl Into<Delay>) -> WaitResult {
        self.wait_until(Some(timeout.into().deadline()))
    }

    fn wait_until(&self, deadline: Option<std::time::Instant>) -> WaitResult {
        let guard = self.inner.state.lock();
        let (_guard, result) =
            self.inner
                .state
                .wait_deadline(guard, deadline, |state| state.outstanding == 0);
        result
    }

    /// Current outstanding count. Racy by nature; for diagnostics.
    pub fn outstanding(&self) -> usize {
        self.inner.state.with(|state| state.outstanding)
    }
}

impl Default for CompletionGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Leaves the group when a `run_async` job ends.
struct Member(CompletionGroup);

impl Drop for Member {
    fn drop(&mut self) {
        self.0.leave();
    }
}
