// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Counting semaphore.
//!
//! Start at 0 for signal/wait hand-off, or at N for a pool of N permits.

use std::sync::Arc;

use crate::sync::Monitor;
use crate::time::{Delay, WaitResult};

/// Clones share the same permits.
#[derive(Clone)]
pub struct CountingSemaphore {
    inner: Arc<Monitor<Permits>>,
}

struct Permits {
    available: usize,
    waiters: usize,
}

impl CountingSemaphore {
    pub fn new(value: usize) -> Self {
        Self {
            inner: Arc::new(Monitor::new(Permits {
                available: value,
                waiters: 0,
            })),
        }
    }

    /// Release one permit. Returns 1 if a blocked waiter was woken, else 0.
    pub fn signal(&self) -> usize {
        let woke = self.inner.with(|permits| {
            permits.available = permits
                .available
                .checked_add(1)
                .expect("CountingSemaphore permit count overflowed");
            permits.waiters > 0
        });
        if woke {
            self.inner.notify_one();
            1
        } else {
            0
        }
    }

    /// Take a permit, blocking until one is available.
    pub fn wait(&self) -> WaitResult {
        self.acquire(None)
    }

    /// Take a permit, giving up after `timeout`. A timed-out wait takes
    /// nothing.
    pub fn wait_timeout(&self, timeout: impl Into<Delay>) -> WaitResult {
        self.acquire(Some(timeout.into().deadline()))
    }

    /// Permits available right now.
    pub fn available(&self) -> usize {
        self.inner.with(|permits| permits.available)
    }

    fn acquire(&self, deadline: Option<std::time::Instant>) -> WaitResult {
        let mut guard = self.inner.lock();
        guard.waiters += 1;
        let (mut guard, result) =
            self.inner
                .wait_deadline(guard, deadline, |permits| permits.available > 0);
        guard.waiters -= 1;
        if result.is_success() {
            guard.available -= 1;
        }
        result
    }
}
