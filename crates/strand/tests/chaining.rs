// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! End-to-end ordering guarantees of chained dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use strand::{Discipline, Dispatch, ItemState, Queue, WorkItem};

const PATIENCE: Duration = Duration::from_secs(10);

/// f1 must finish before f2 starts, whatever the queues.
fn assert_strict_order(q1: Queue, q2: Queue) {
    for _ in 0..25 {
        let first_done = Arc::new(AtomicBool::new(false));
        let violated = Arc::new(AtomicBool::new(false));
        let (done, seen, bad) = (first_done.clone(), first_done.clone(), violated.clone());
        let link = Dispatch::run_async(&q1, move || {
            std::thread::sleep(Duration::from_millis(1));
            done.store(true, Ordering::SeqCst);
        })
        .then_async(&q2, move || {
            if !seen.load(Ordering::SeqCst) {
                bad.store(true, Ordering::SeqCst);
            }
        });
        assert!(link.wait_timeout(PATIENCE).is_success());
        assert!(!violated.load(Ordering::SeqCst));
    }
}

#[test]
fn order_holds_on_one_concurrent_queue() {
    let q = Queue::custom("it.concurrent", Discipline::Concurrent);
    assert_strict_order(q.clone(), q);
}

#[test]
fn order_holds_across_queues() {
    assert_strict_order(
        Queue::utility(),
        Queue::custom("it.serial", Discipline::Serial),
    );
    assert_strict_order(Queue::background(), Queue::main());
}

#[test]
fn delayed_link_waits_after_parent() {
    let (tx, rx) = mpsc::channel();
    let delay = Duration::from_millis(60);
    let child_started = Arc::new(Mutex::new(None));
    let started = child_started.clone();
    let link = Dispatch::run_async(&Queue::utility(), move || {
        tx.send(Instant::now()).unwrap();
    })
    .then_after(delay, &Queue::user_initiated(), move || {
        *started.lock().unwrap() = Some(Instant::now());
    });
    let parent_done = rx.recv_timeout(PATIENCE).unwrap();
    assert!(link.wait_timeout(PATIENCE).is_success());
    let child_started = child_started.lock().unwrap().unwrap();
    assert!(child_started.duration_since(parent_done) >= delay);
}

#[test]
fn three_stage_pipeline_mixed_links() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (a, b, c, d) = (log.clone(), log.clone(), log.clone(), log.clone());
    let serial = Queue::custom("it.pipeline", Discipline::Serial);
    let last = Dispatch::run_after(0.01, &serial, move || a.lock().unwrap().push("after"))
        .then_sync(&serial, move || b.lock().unwrap().push("sync"))
        .then_async_main(move || c.lock().unwrap().push("main"))
        .then_after(0.01, &Queue::background(), move || d.lock().unwrap().push("tail"));
    assert!(last.wait_timeout(PATIENCE).is_success());
    assert_eq!(*log.lock().unwrap(), vec!["after", "sync", "main", "tail"]);
}

#[test]
fn waiting_on_a_link_does_not_wait_for_later_links() {
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let head = Dispatch::run_async(&Queue::utility(), || {});
    let tail = head.then_async(&Queue::utility(), move || {
        release_rx.recv().unwrap();
    });
    assert!(head.wait_timeout(PATIENCE).is_success());
    assert!(tail.wait_timeout(Duration::from_millis(30)).is_timed_out());
    release_tx.send(()).unwrap();
    assert!(tail.wait_timeout(PATIENCE).is_success());
}

#[test]
fn hand_built_items_chain_like_links() {
    let first = WorkItem::new(|| {});
    let second = WorkItem::new(|| {});
    first.notify(&Queue::utility(), second.clone());
    Queue::utility().submit_item(&first);
    let link = Dispatch::from(second);
    assert!(link.wait_timeout(PATIENCE).is_success());
    assert_eq!(first.state(), ItemState::Completed);
}
