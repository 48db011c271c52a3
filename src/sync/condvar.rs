//! Condition variables with Mesa semantics.

use crate::error::{ThreadError, ThreadResult};
use crate::sync::mutex::Mutex;
use crate::sync::rlock::RecursiveLock;
use crate::{genwait, irq};
use core::cell::UnsafeCell;

/// The pairing capability a condition variable needs from its lock:
/// release exactly one level on entry to a wait, re-acquire exactly one
/// level on the way out.
pub trait WaitLock {
    fn release_one(&self) -> ThreadResult<()>;
    fn reacquire_one(&self) -> ThreadResult<()>;
}

impl WaitLock for Mutex {
    fn release_one(&self) -> ThreadResult<()> {
        self.unlock()
    }

    fn reacquire_one(&self) -> ThreadResult<()> {
        self.lock()
    }
}

impl WaitLock for RecursiveLock {
    fn release_one(&self) -> ThreadResult<()> {
        self.unlock()
    }

    fn reacquire_one(&self) -> ThreadResult<()> {
        self.lock()
    }
}

/// A condition variable.
///
/// Carries no state of its own: it is a rendezvous address in the wait
/// table. Pair it with a [`Mutex`] or a [`RecursiveLock`].
///
/// With a recursive lock, exactly one nesting level is released: a
/// thread that nested N deep before waiting blocks while still holding
/// the lock at level N-1, which deadlocks anyone else trying to take it.
/// Lock once before waiting.
pub struct CondVar {
    _anchor: UnsafeCell<u8>,
}

unsafe impl Send for CondVar {}
unsafe impl Sync for CondVar {}

impl CondVar {
    pub const fn new() -> Self {
        Self {
            _anchor: UnsafeCell::new(0),
        }
    }

    fn key(&self) -> usize {
        self as *const CondVar as usize
    }

    /// Release one level of `lock`, sleep until signalled, re-acquire.
    ///
    /// The caller must hold `lock`. Mesa semantics: re-check the
    /// predicate after waking.
    pub fn wait<L: WaitLock>(&self, lock: &L) -> ThreadResult<()> {
        self.wait_timed(lock, 0)
    }

    /// As [`wait`](Self::wait) with a timeout (0 = forever).
    ///
    /// On `TimedOut` the lock has still been re-acquired.
    pub fn wait_timed<L: WaitLock>(&self, lock: &L, timeout_ms: u64) -> ThreadResult<()> {
        if irq::inside_interrupt() {
            return Err(ThreadError::NotPermitted);
        }
        let state = irq::disable();
        let result = {
            // Interrupts stay masked from the unlock through the
            // enqueue: a signal cannot slip in between.
            match lock.release_one() {
                Ok(()) => {
                    let waited = genwait::wait(self.key(), "cond_wait", timeout_ms, None);
                    match (waited, lock.reacquire_one()) {
                        (Err(e), _) => Err(e),
                        (Ok(()), Err(e)) => Err(e),
                        (Ok(()), Ok(())) => Ok(()),
                    }
                }
                Err(e) => Err(e),
            }
        };
        irq::restore(state);
        result
    }

    /// Wake the oldest waiter. Interrupt-callable.
    pub fn signal(&self) -> usize {
        genwait::wake_one(self.key())
    }

    /// Wake every waiter. Interrupt-callable.
    pub fn broadcast(&self) -> usize {
        genwait::wake_all(self.key())
    }

    /// Wake every waiter with `TimedOut` so none of them is left
    /// sleeping on a dead address.
    pub fn destroy(&self) -> usize {
        genwait::wake_all_err(self.key(), ThreadError::TimedOut)
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler;
    use crate::test_util;
    use crate::thread::ThreadState;

    #[test]
    fn test_signal_wakes_oldest_waiter() {
        let _t = test_util::serialize();
        let (t1, t2, _t3) = test_util::spawn_three();
        let cv = CondVar::new();
        let key = &cv as *const CondVar as usize;

        test_util::park(t1, key, "cond_wait", 0, None);
        test_util::park(t2, key, "cond_wait", 0, None);

        assert_eq!(cv.signal(), 1);
        assert_eq!(scheduler::state_of(t1), Some(ThreadState::Ready));
        assert_eq!(scheduler::state_of(t2), Some(ThreadState::Waiting));
    }

    #[test]
    fn test_broadcast_wakes_everyone() {
        let _t = test_util::serialize();
        let (t1, t2, t3) = test_util::spawn_three();
        let cv = CondVar::new();
        let key = &cv as *const CondVar as usize;

        test_util::park(t1, key, "cond_wait", 0, None);
        test_util::park(t2, key, "cond_wait", 0, None);
        test_util::park(t3, key, "cond_wait", 0, None);

        assert_eq!(cv.broadcast(), 3);
        for t in [t1, t2, t3] {
            assert_eq!(scheduler::wait_result_of(t), Some(Ok(())));
        }
    }

    #[test]
    fn test_destroy_delivers_timed_out() {
        let _t = test_util::serialize();
        let (t1, _t2, _t3) = test_util::spawn_three();
        let cv = CondVar::new();
        let key = &cv as *const CondVar as usize;

        test_util::park(t1, key, "cond_wait", 0, None);
        assert_eq!(cv.destroy(), 1);
        assert_eq!(
            scheduler::wait_result_of(t1),
            Some(Err(ThreadError::TimedOut))
        );
    }

    #[test]
    fn test_wait_rejected_inside_interrupt() {
        let _t = test_util::serialize();
        let cv = CondVar::new();
        let m = Mutex::normal();
        m.lock().unwrap();
        irq::enter_interrupt();
        let r = cv.wait(&m);
        irq::leave_interrupt();
        assert_eq!(r, Err(ThreadError::NotPermitted));
        // The lock was never released.
        assert!(m.is_locked());
    }

    #[test]
    fn test_release_one_drops_single_nesting_level() {
        let _t = test_util::serialize();
        let l = RecursiveLock::new();
        l.lock().unwrap();
        l.lock().unwrap();
        l.release_one().unwrap();
        // Nested twice, released once: still held at one level.
        assert_eq!(l.count(), 1);
        l.reacquire_one().unwrap();
        assert_eq!(l.count(), 2);
        l.unlock().unwrap();
        l.unlock().unwrap();
    }
}
