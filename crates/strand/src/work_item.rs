// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cancellable, waitable unit of work.
//!
//! A `WorkItem` wraps one closure and moves through
//! `Pending -> Running -> Completed` or `Pending -> Cancelled`, never back.
//! Other items can be registered as dependents: when this one completes
//! each dependent is submitted to its queue, once, in registration order.
//! Registering after completion submits the dependent straight away, so a
//! registration racing completion is never lost.
//!
//! Cancellation is advisory. It stops an item that hasn't started; once the
//! closure is running it only suppresses the dependents.

use std::fmt;
use std::sync::Arc;

use log::trace;

use crate::queue::{Priority, Queue};
use crate::runtime::{self, Job};
use crate::sync::Monitor;
use crate::time::{Delay, WaitResult};

/// Lifecycle of a [`WorkItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Running,
    Completed,
    Cancelled,
}

impl ItemState {
    fn is_finished(self) -> bool {
        matches!(self, ItemState::Completed | ItemState::Cancelled)
    }
}

/// Shared handle to a unit of work. Clones refer to the same item.
#[derive(Clone)]
pub struct WorkItem {
    inner: Arc<ItemInner>,
}

struct ItemInner {
    state: Monitor<ItemData>,
    priority: Priority,
}

struct ItemData {
    state: ItemState,
    task: Option<Job>,
    cancel_requested: bool,
    dependents: Vec<Dependent>,
}

/// Chain link: run `item` on `queue` once the owner completes.
struct Dependent {
    queue: Queue,
    item: WorkItem,
}

impl Dependent {
    fn schedule(self) {
        let item = self.item;
        self.queue.enqueue(Box::new(move || item.perform()), false);
    }
}

impl WorkItem {
    /// Wrap `f`. The item inherits the priority of the creating thread.
    pub fn new<F>(f: F) -> WorkItem
    where
        F: FnOnce() + Send + 'static,
    {
        WorkItem {
            inner: Arc::new(ItemInner {
                state: Monitor::new(ItemData {
                    state: ItemState::Pending,
                    task: Some(Box::new(f)),
                    cancel_requested: false,
                    dependents: Vec::new(),
                }),
                priority: runtime::current_priority(),
            }),
        }
    }

    /// Run the closure on the calling thread, then notify dependents.
    ///
    /// Does nothing unless the item is still pending. A panic from the
    /// closure still completes the item (and fires its dependents) before
    /// it propagates.
    pub fn perform(&self) {
        let task = self.inner.state.with(|data| {
            if data.state != ItemState::Pending {
                return None;
            }
            data.state = ItemState::Running;
            data.task.take()
        });
        let Some(task) = task else {
            return;
        };
        let _completion = Completion { item: self };
        task();
    }

    /// Request cancellation.
    ///
    /// A pending item becomes `Cancelled`: it will never run, waiters wake,
    /// and its dependents are dropped. A running item keeps running, but
    /// its dependents won't be scheduled when it completes.
    pub fn cancel(&self) {
        let released = self.inner.state.with(|data| {
            data.cancel_requested = true;
            if data.state != ItemState::Pending {
                return None;
            }
            data.state = ItemState::Cancelled;
            Some((data.task.take(), std::mem::take(&mut data.dependents)))
        });
        if released.is_some() {
            self.inner.state.notify_all();
        }
        // Captures and abandoned dependents drop here, outside the lock.
        drop(released);
    }

    /// Whether [`cancel`](Self::cancel) has been called, even if the
    /// closure was already running at the time.
    pub fn is_cancelled(&self) -> bool {
        self.inner.state.with(|data| data.cancel_requested)
    }

    pub fn state(&self) -> ItemState {
        self.inner.state.with(|data| data.state)
    }

    /// Priority inherited from the thread that created the item.
    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    /// Block until the item completes or is cancelled.
    pub fn wait(&self) -> WaitResult {
        self.wait_until(None)
    }

    /// Block until the item completes or is cancelled, or `timeout`
    /// elapses. Timing out leaves the item untouched.
    pub fn wait_timeout(&self, timeout: impl Into<Delay>) -> WaitResult {
        self.wait_until(Some(timeout.into().deadline()))
    }

    fn wait_until(&self, deadline: Option<std::time::Instant>) -> WaitResult {
        let guard = self.inner.state.lock();
        let (_guard, result) = self
            .inner
            .state
            .wait_deadline(guard, deadline, |data| data.state.is_finished());
        result
    }

    /// Submit `next` to `queue` once this item completes.
    ///
    /// Dependents fire in registration order. If this item has already
    /// completed, `next` is submitted immediately; if it was cancelled,
    /// `next` is never scheduled.
    pub fn notify(&self, queue: &Queue, next: WorkItem) {
        let dependent = Dependent {
            queue: queue.clone(),
            item: next,
        };
        let late = self.inner.state.with(|data| match data.state {
            ItemState::Pending | ItemState::Running => {
                data.dependents.push(dependent);
                None
            }
            ItemState::Completed if !data.cancel_requested => Some(dependent),
            ItemState::Completed | ItemState::Cancelled => {
                trace!("dependent registered on cancelled item; not scheduled");
                None
            }
        });
        if let Some(dependent) = late {
            trace!("dependent registered after completion; scheduling now");
            dependent.schedule();
        }
    }
}

/// Marks the item completed when `perform` ends, normally or by panic.
struct Completion<'a> {
    item: &'a WorkItem,
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        let state = &self.item.inner.state;
        let dependents = state.with(|data| {
            data.state = ItemState::Completed;
            let dependents = std::mem::take(&mut data.dependents);
            if data.cancel_requested {
                Vec::new()
            } else {
                dependents
            }
        });
        state.notify_all();
        for dependent in dependents {
            dependent.schedule();
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("state", &self.state())
            .field("priority", &self.inner.priority)
            .finish()
    }
}
