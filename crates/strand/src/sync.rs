// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Internal locking primitives.
//!
//! Every shared structure in the crate owns its own `Lock` or `Monitor`;
//! there is no global lock. Poisoning is ignored: user closures never run
//! while one of these is held, so a poisoned lock only means a panic
//! escaped between two plain field updates.

use std::sync::{self, Condvar, MutexGuard, PoisonError};
use std::time::Instant;

use crate::time::WaitResult;

/// Exclusive-access wrapper with closure and guard access.
#[derive(Debug, Default)]
pub(crate) struct Lock<T> {
    inner: sync::Mutex<T>,
}

impl<T> Lock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: sync::Mutex::new(value),
        }
    }

    /// Acquire the lock and keep the guard.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire the lock and run `f` with exclusive access.
    pub fn with<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }
}

/// A `Lock` paired with a condition variable.
#[derive(Debug, Default)]
pub(crate) struct Monitor<T> {
    lock: Lock<T>,
    cvar: Condvar,
}

impl<T> Monitor<T> {
    pub fn new(value: T) -> Self {
        Self {
            lock: Lock::new(value),
            cvar: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.lock.lock()
    }

    pub fn with<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> R {
        self.lock.with(f)
    }

    pub fn notify_one(&self) {
        self.cvar.notify_one();
    }

    pub fn notify_all(&self) {
        self.cvar.notify_all();
    }

    /// Single wait, bounded by `deadline` when given. Spurious wakeups are
    /// possible; callers loop over their own condition.
    pub fn park<'a>(&self, guard: MutexGuard<'a, T>, deadline: Option<Instant>) -> MutexGuard<'a, T> {
        match deadline {
            None => self.cvar.wait(guard).unwrap_or_else(PoisonError::into_inner),
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                self.cvar
                    .wait_timeout(guard, timeout)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
        }
    }

    /// Block until `ready` returns true.
    pub fn wait_until_ready<'a, F>(&self, mut guard: MutexGuard<'a, T>, mut ready: F) -> MutexGuard<'a, T>
    where
        F: FnMut(&mut T) -> bool,
    {
        while !ready(&mut guard) {
            guard = self.cvar.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
        guard
    }

    /// Block until `ready` returns true or `deadline` passes.
    ///
    /// `None` waits forever. `ready` is re-checked after every wakeup, so
    /// a state change that lands exactly at the deadline still counts.
    pub fn wait_deadline<'a, F>(
        &self,
        mut guard: MutexGuard<'a, T>,
        deadline: Option<Instant>,
        mut ready: F,
    ) -> (MutexGuard<'a, T>, WaitResult)
    where
        F: FnMut(&mut T) -> bool,
    {
        let Some(deadline) = deadline else {
            return (self.wait_until_ready(guard, ready), WaitResult::Success);
        };
        loop {
            if ready(&mut guard) {
                return (guard, WaitResult::Success);
            }
            let now = Instant::now();
            if now >= deadline {
                return (guard, WaitResult::TimedOut);
            }
            guard = self
                .cvar
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
