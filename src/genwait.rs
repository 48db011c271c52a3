//! The generic wait table: the universal blocking primitive.
//!
//! A thread suspends on an opaque wait key (any non-null address) with an
//! optional timeout; any code that owns the key can wake some or all of
//! the threads sleeping on it. Every blocking operation in the crate --
//! semaphores, mutexes, condition variables, reader/writer semaphores,
//! sleep, join, poll -- funnels through [`wait`].
//!
//! Wake order within one key is FIFO. Wake operations are
//! interrupt-callable: they only mark threads ready and never switch
//! contexts themselves.

use crate::error::{ThreadError, ThreadResult};
use crate::thread::ThreadId;
use crate::{irq, scheduler, time};
use alloc::vec::Vec;
use spin::Mutex;

struct Waiter {
    tid: ThreadId,
    obj: usize,
    label: &'static str,
    /// Absolute deadline in ms since boot; 0 = no timeout.
    deadline: u64,
    callback: Option<fn(usize)>,
}

struct WaitTable {
    /// All sleeping threads, in arrival order. FIFO per key falls out of
    /// scanning front to back.
    waiters: Vec<Waiter>,
}

impl WaitTable {
    const fn new() -> Self {
        Self {
            waiters: Vec::new(),
        }
    }
}

static TABLE: Mutex<WaitTable> = Mutex::new(WaitTable::new());

/// Suspend the current thread on `obj` until a wake or the timeout.
///
/// `timeout_ms` of 0 means wait forever. When the deadline elapses first,
/// `callback` (if any) is invoked with `obj` before the thread resumes,
/// and the call returns `TimedOut`. A third party waking the key with an
/// error code surfaces that error instead; a plain wake returns `Ok`.
///
/// Safe to call with interrupts already disabled (the mask nests). Fails
/// with `NotPermitted` inside an interrupt handler, and with
/// `InvalidArgument` for a null key.
pub fn wait(
    obj: usize,
    label: &'static str,
    timeout_ms: u64,
    callback: Option<fn(usize)>,
) -> ThreadResult<()> {
    if obj == 0 {
        return Err(ThreadError::InvalidArgument);
    }
    if irq::inside_interrupt() {
        return Err(ThreadError::NotPermitted);
    }
    let state = irq::disable();
    let result = wait_inner(obj, label, timeout_ms, callback);
    irq::restore(state);
    result
}

fn wait_inner(
    obj: usize,
    label: &'static str,
    timeout_ms: u64,
    callback: Option<fn(usize)>,
) -> ThreadResult<()> {
    let tid = scheduler::current_tid()?;
    let deadline = if timeout_ms > 0 {
        time::now_ms().saturating_add(timeout_ms)
    } else {
        0
    };
    enqueue_waiter(tid, obj, label, deadline, callback);
    let result = scheduler::block_current(label);
    if result.is_err() {
        // A waker removes the record before readying us; on the failure
        // paths (including a refused block) it may still be ours to drop.
        remove_waiter(tid, obj);
    }
    result
}

fn remove_waiter(tid: ThreadId, obj: usize) {
    let mut table = TABLE.lock();
    if let Some(pos) = table
        .waiters
        .iter()
        .position(|w| w.tid == tid && w.obj == obj)
    {
        table.waiters.remove(pos);
    }
}

/// Insert a waiter record. The caller is responsible for parking the
/// thread itself via the scheduler.
pub(crate) fn enqueue_waiter(
    tid: ThreadId,
    obj: usize,
    label: &'static str,
    deadline: u64,
    callback: Option<fn(usize)>,
) {
    TABLE.lock().waiters.push(Waiter {
        tid,
        obj,
        label,
        deadline,
        callback,
    });
}

fn wake_matching<F>(max: usize, result: ThreadResult<()>, mut pred: F) -> usize
where
    F: FnMut(&Waiter) -> bool,
{
    let _g = irq::IrqGuard::enter();
    let mut woken = 0;
    let mut table = TABLE.lock();
    let mut i = 0;
    while i < table.waiters.len() && woken < max {
        if pred(&table.waiters[i]) {
            let w = table.waiters.remove(i);
            scheduler::make_ready(w.tid, result);
            woken += 1;
        } else {
            i += 1;
        }
    }
    woken
}

/// Wake up to `count` threads sleeping on `obj`, oldest first.
/// `count <= 0` wakes all of them. Returns the number actually woken.
pub fn wake_count(obj: usize, count: i32) -> usize {
    let max = if count <= 0 { usize::MAX } else { count as usize };
    wake_matching(max, Ok(()), |w| w.obj == obj)
}

/// Wake the thread that has been sleeping on `obj` the longest.
pub fn wake_one(obj: usize) -> usize {
    wake_count(obj, 1)
}

/// Wake every thread sleeping on `obj`.
pub fn wake_all(obj: usize) -> usize {
    wake_count(obj, 0)
}

/// Wake every thread sleeping on `obj` with an error code, so their
/// `wait` call fails with `err`. Used by destroy paths so sleepers
/// observe an error rather than a dangling primitive.
pub fn wake_all_err(obj: usize, err: ThreadError) -> usize {
    wake_matching(usize::MAX, Err(err), |w| w.obj == obj)
}

/// Wake one specific thread sleeping on `obj`.
pub fn wake_thread(obj: usize, tid: ThreadId, err: Option<ThreadError>) -> bool {
    let result = match err {
        Some(e) => Err(e),
        None => Ok(()),
    };
    wake_matching(1, result, |w| w.obj == obj && w.tid == tid) == 1
}

/// Wake the oldest waiter on `obj` and report who it was.
pub(crate) fn wake_one_tid(obj: usize) -> Option<ThreadId> {
    let _g = irq::IrqGuard::enter();
    let mut table = TABLE.lock();
    let pos = table.waiters.iter().position(|w| w.obj == obj)?;
    let w = table.waiters.remove(pos);
    scheduler::make_ready(w.tid, Ok(()));
    Some(w.tid)
}

/// Number of threads currently sleeping on `obj`.
pub(crate) fn waiter_count(obj: usize) -> usize {
    let _g = irq::IrqGuard::enter();
    TABLE.lock().waiters.iter().filter(|w| w.obj == obj).count()
}

/// Wake every waiter whose deadline has passed, firing timeout callbacks
/// first. The scheduler's timer hook calls this every tick.
///
/// Runs in small fixed batches so callbacks execute outside the table
/// lock and the sweep never allocates (it must be interrupt-callable).
pub fn check_timeouts(now: u64) {
    loop {
        let mut due: [Option<(ThreadId, usize, Option<fn(usize)>)>; 8] = [None; 8];
        let mut n = 0;
        {
            let _g = irq::IrqGuard::enter();
            let mut table = TABLE.lock();
            let mut i = 0;
            while i < table.waiters.len() && n < due.len() {
                let expired =
                    table.waiters[i].deadline != 0 && table.waiters[i].deadline <= now;
                if expired {
                    let w = table.waiters.remove(i);
                    due[n] = Some((w.tid, w.obj, w.callback));
                    n += 1;
                } else {
                    i += 1;
                }
            }
        }
        if n == 0 {
            return;
        }
        for slot in due.iter().take(n) {
            if let Some((tid, obj, callback)) = *slot {
                if let Some(cb) = callback {
                    cb(obj);
                }
                scheduler::make_ready(tid, Err(ThreadError::TimedOut));
            }
        }
        if n < due.len() {
            return;
        }
    }
}

/// Earliest pending deadline across all waiters, or 0 if none has a
/// timeout. Lets the platform program a tight one-shot tick.
pub fn next_timeout() -> u64 {
    let _g = irq::IrqGuard::enter();
    TABLE
        .lock()
        .waiters
        .iter()
        .filter(|w| w.deadline != 0)
        .map(|w| w.deadline)
        .min()
        .unwrap_or(0)
}

/// Diagnostic: the wait-site label of a sleeping thread.
pub fn wait_label_of(tid: ThreadId) -> Option<&'static str> {
    let _g = irq::IrqGuard::enter();
    TABLE
        .lock()
        .waiters
        .iter()
        .find(|w| w.tid == tid)
        .map(|w| w.label)
}

pub(crate) fn clear() {
    TABLE.lock().waiters.clear();
}
