// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Serial task chain: a FIFO of closures run one at a time.
//!
//! State machine: `Idle --append--> Draining --empty--> Idle`.
//!
//! The first append to an idle chain makes the appending thread the
//! drainer: it runs closures, each outside the lock, until it finds the
//! queue empty. Appends that arrive meanwhile, from any thread or from a
//! running closure, are queued and picked up by that same drainer. The
//! emptiness check and the switch back to idle happen under one lock
//! acquisition, so an append can never slip between them and be stranded.
//!
//! A panicking closure unwinds out of the `append` call that was draining.
//! Closures queued behind it still run, in order, on a runtime worker.

use std::collections::VecDeque;
use std::sync::Arc;

use log::warn;

use crate::queue::Queue;
use crate::runtime::{self, Job};
use crate::sync::Lock;
use crate::time::Delay;

/// Clones share the same chain.
#[derive(Clone, Default)]
pub struct SerialTaskChain {
    inner: Arc<Lock<ChainState>>,
}

#[derive(Default)]
struct ChainState {
    pending: VecDeque<Job>,
    draining: bool,
}

impl SerialTaskChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `f` behind everything appended before it.
    ///
    /// If the chain was idle this call drains it on the current thread and
    /// returns once the chain is empty again; otherwise it returns at once.
    pub fn append<F>(&self, f: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        let start = self.inner.with(|state| {
            state.pending.push_back(Box::new(f));
            !std::mem::replace(&mut state.draining, true)
        });
        if start {
            self.drain();
        }
        self
    }

    /// Append a step that submits `f` to `queue` without waiting for it.
    pub fn append_async<F>(&self, queue: &Queue, f: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        let queue = queue.clone();
        self.append(move || queue.submit_async(f))
    }

    /// Append a step that runs `f` on `queue` and holds the chain until it
    /// returns.
    pub fn append_sync<F>(&self, queue: &Queue, f: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        let queue = queue.clone();
        self.append(move || queue.submit_sync(f))
    }

    /// Append a step that submits `f` to `queue` after `delay`.
    pub fn append_after<F>(&self, delay: impl Into<Delay>, queue: &Queue, f: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        let delay = delay.into();
        let queue = queue.clone();
        self.append(move || queue.submit_after(delay, f))
    }

    pub fn is_draining(&self) -> bool {
        self.inner.with(|state| state.draining)
    }

    /// Closures queued and not yet started.
    pub fn len(&self) -> usize {
        self.inner.with(|state| state.pending.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drain(&self) {
        let _unwind = DrainGuard(self);
        loop {
            let next = self.inner.with(|state| {
                let next = state.pending.pop_front();
                if next.is_none() {
                    state.draining = false;
                }
                next
            });
            match next {
                Some(job) => job(),
                None => return,
            }
        }
    }
}

/// Keeps the chain moving when a closure panics mid-drain: the panic
/// unwinds into the appending caller, and whatever is still queued is
/// drained on a runtime worker instead. An empty chain just goes idle.
struct DrainGuard<'a>(&'a SerialTaskChain);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let handoff = self.0.inner.with(|state| {
            state.draining = !state.pending.is_empty();
            state.draining
        });
        if handoff {
            warn!("serial chain step panicked; draining the rest on a worker");
            let chain = self.0.clone();
            Queue::global(runtime::current_priority()).submit_async(move || chain.drain());
        }
    }
}
