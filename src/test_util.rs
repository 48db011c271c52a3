//! Test-only plumbing: the crate's singletons (scheduler, wait table,
//! TLS registry, poll bridge, clock) are process-wide, so tests that
//! touch them serialize on one lock and start from a freshly
//! initialized kernel.

use crate::thread::ThreadId;
use crate::{genwait, scheduler, time};
use std::sync::{Mutex, MutexGuard};

static TEST_LOCK: Mutex<()> = Mutex::new(());

/// Serialize the calling test and reset every kernel singleton.
pub(crate) fn serialize() -> MutexGuard<'static, ()> {
    let guard = TEST_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    crate::irq::test_reset();
    scheduler::shutdown();
    time::reset();
    scheduler::init().expect("scheduler init");
    guard
}

/// Three spawned (never-run) threads to park on wait keys.
pub(crate) fn spawn_three() -> (ThreadId, ThreadId, ThreadId) {
    let a = scheduler::spawn(|| 0).expect("spawn");
    let b = scheduler::spawn(|| 0).expect("spawn");
    let c = scheduler::spawn(|| 0).expect("spawn");
    (a, b, c)
}

/// Park a thread on a wait key exactly the way `genwait::wait` would:
/// Waiting state in the scheduler plus a waiter record in the table.
/// `timeout_ms` is relative to the current clock; 0 means no deadline.
pub(crate) fn park(
    tid: ThreadId,
    obj: usize,
    label: &'static str,
    timeout_ms: u64,
    callback: Option<fn(usize)>,
) {
    let deadline = if timeout_ms > 0 {
        time::now_ms().saturating_add(timeout_ms)
    } else {
        0
    };
    scheduler::test_support::force_wait(tid, label);
    genwait::enqueue_waiter(tid, obj, label, deadline, callback);
}
