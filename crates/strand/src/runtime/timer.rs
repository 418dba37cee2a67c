// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Timer thread.
//!
//! A single thread owns a min-heap of deadlines. Firing an entry runs its
//! callback on the timer thread; callbacks only hand work to a queue, so
//! they stay short.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use log::debug;

use super::Job;
use crate::config::RuntimeConfig;
use crate::sync::{Lock, Monitor};

pub(crate) struct Timer {
    shared: Arc<Monitor<TimerState>>,
    thread: Lock<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
    shutdown: bool,
}

/// Ordered by deadline, then by insertion so equal deadlines fire FIFO.
struct Entry {
    deadline: Instant,
    seq: u64,
    fire: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

impl Timer {
    pub fn new(name: &str, config: &RuntimeConfig) -> Self {
        let shared = Arc::new(Monitor::new(TimerState::default()));
        let handle = {
            let shared = shared.clone();
            config
                .thread_builder(name.to_string())
                .spawn(move || timer_loop(&shared))
                .expect("failed to spawn timer thread")
        };
        Self {
            shared,
            thread: Lock::new(Some(handle)),
        }
    }

    /// Run `fire` on the timer thread once `deadline` has passed.
    pub fn schedule(&self, deadline: Instant, fire: Job) {
        let wake = self.shared.with(|state| {
            let seq = state.next_seq;
            state.next_seq += 1;
            // Only an entry that becomes the new head changes how long the
            // timer thread should sleep.
            let is_head = state
                .heap
                .peek()
                .map_or(true, |Reverse(head)| deadline < head.deadline);
            state.heap.push(Reverse(Entry { deadline, seq, fire }));
            is_head
        });
        if wake {
            self.shared.notify_one();
        }
    }

    /// Number of entries not fired yet.
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.shared.with(|state| state.heap.len())
    }

    /// Stop the timer thread. Unfired entries are dropped.
    pub fn shutdown(&self) {
        let dropped = self.shared.with(|state| {
            state.shutdown = true;
            std::mem::take(&mut state.heap).len()
        });
        self.shared.notify_all();
        if dropped > 0 {
            debug!("timer shut down with {} unfired entries", dropped);
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(shared: &Monitor<TimerState>) {
    debug!("timer thread up");
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            break;
        }

        let now = Instant::now();
        let mut due = Vec::new();
        while state
            .heap
            .peek()
            .is_some_and(|Reverse(entry)| entry.deadline <= now)
        {
            if let Some(Reverse(entry)) = state.heap.pop() {
                due.push(entry);
            }
        }

        if !due.is_empty() {
            drop(state);
            for entry in due {
                (entry.fire)();
            }
            state = shared.lock();
            continue;
        }

        let next = state.heap.peek().map(|Reverse(entry)| entry.deadline);
        state = shared.park(state, next);
    }
    debug!("timer thread down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn timer() -> Timer {
        Timer::new("test-timer", &RuntimeConfig::default())
    }

    #[test]
    fn fires_after_deadline() {
        let t = timer();
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        t.schedule(
            start + Duration::from_millis(30),
            Box::new(move || tx.send(Instant::now()).unwrap()),
        );
        let fired = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired.duration_since(start) >= Duration::from_millis(30));
    }

    #[test]
    fn earlier_deadline_fires_first() {
        let t = timer();
        let (tx, rx) = mpsc::channel();
        let now = Instant::now();
        let tx2 = tx.clone();
        t.schedule(now + Duration::from_millis(60), Box::new(move || tx.send("late").unwrap()));
        t.schedule(now + Duration::from_millis(10), Box::new(move || tx2.send("early").unwrap()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "early");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "late");
    }

    #[test]
    fn equal_deadlines_fire_in_insertion_order() {
        let t = timer();
        let (tx, rx) = mpsc::channel();
        let at = Instant::now() + Duration::from_millis(10);
        for i in 0..5 {
            let tx = tx.clone();
            t.schedule(at, Box::new(move || tx.send(i).unwrap()));
        }
        let got: Vec<i32> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn shutdown_drops_unfired() {
        let t = timer();
        t.schedule(Instant::now() + Duration::from_secs(60), Box::new(|| {}));
        assert_eq!(t.pending(), 1);
        t.shutdown();
        assert_eq!(t.pending(), 0);
    }
}
