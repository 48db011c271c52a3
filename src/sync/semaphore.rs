//! Counting semaphore.

use crate::error::{ThreadError, ThreadResult};
use crate::{genwait, irq};
use core::cell::UnsafeCell;

/// A counting semaphore. The count never goes below zero: a signal with
/// waiters present hands its increment straight to the oldest waiter.
pub struct Semaphore {
    count: UnsafeCell<u32>,
}

unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    pub const fn new(count: u32) -> Self {
        Self {
            count: UnsafeCell::new(count),
        }
    }

    fn key(&self) -> usize {
        self as *const Semaphore as usize
    }

    /// Take one unit, blocking until one is available.
    pub fn wait(&self) -> ThreadResult<()> {
        self.wait_timed(0)
    }

    /// Take one unit, giving up after `timeout_ms` (0 = forever).
    pub fn wait_timed(&self, timeout_ms: u64) -> ThreadResult<()> {
        if irq::inside_interrupt() {
            return Err(ThreadError::NotPermitted);
        }
        let state = irq::disable();
        let result = {
            let count = unsafe { &mut *self.count.get() };
            if *count > 0 {
                *count -= 1;
                Ok(())
            } else {
                // A signal that finds us queued consumes its own
                // increment on our behalf; a plain wake means we own it.
                genwait::wait(self.key(), "sem_wait", timeout_ms, None)
            }
        };
        irq::restore(state);
        result
    }

    /// Take one unit without blocking. Interrupt-callable.
    pub fn try_wait(&self) -> ThreadResult<()> {
        let _g = irq::IrqGuard::enter();
        let count = unsafe { &mut *self.count.get() };
        if *count > 0 {
            *count -= 1;
            Ok(())
        } else {
            Err(ThreadError::WouldBlock)
        }
    }

    /// Release one unit, waking the oldest waiter if any.
    /// Interrupt-callable.
    pub fn signal(&self) {
        let _g = irq::IrqGuard::enter();
        if genwait::wake_one(self.key()) == 0 {
            let count = unsafe { &mut *self.count.get() };
            *count = count.saturating_add(1);
        }
    }

    /// Advisory read of the count.
    pub fn count(&self) -> u32 {
        let _g = irq::IrqGuard::enter();
        unsafe { *self.count.get() }
    }

    /// Fails with `Busy` while threads are blocked on the semaphore.
    pub fn destroy(&self) -> ThreadResult<()> {
        let _g = irq::IrqGuard::enter();
        if genwait::waiter_count(self.key()) > 0 {
            return Err(ThreadError::Busy);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util;
    use crate::thread::ThreadState;
    use crate::{scheduler, time};

    #[test]
    fn test_counting_fast_path() {
        let _t = test_util::serialize();
        let sem = Semaphore::new(2);
        assert_eq!(sem.count(), 2);
        sem.wait().unwrap();
        sem.wait().unwrap();
        assert_eq!(sem.count(), 0);
        assert_eq!(sem.try_wait(), Err(ThreadError::WouldBlock));
        sem.signal();
        assert_eq!(sem.count(), 1);
        sem.try_wait().unwrap();
    }

    #[test]
    fn test_signal_hands_off_to_waiter() {
        let _t = test_util::serialize();
        let (t1, t2, _t3) = test_util::spawn_three();
        let sem = Semaphore::new(0);
        let key = &sem as *const Semaphore as usize;

        test_util::park(t1, key, "sem_wait", 0, None);
        test_util::park(t2, key, "sem_wait", 0, None);

        // The increment transfers to the oldest waiter: count stays 0.
        sem.signal();
        assert_eq!(sem.count(), 0);
        assert_eq!(scheduler::state_of(t1), Some(ThreadState::Ready));
        assert_eq!(scheduler::wait_result_of(t1), Some(Ok(())));
        assert_eq!(scheduler::state_of(t2), Some(ThreadState::Waiting));

        sem.signal();
        assert_eq!(scheduler::state_of(t2), Some(ThreadState::Ready));

        // No waiters left: the increment lands in the count.
        sem.signal();
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn test_wait_timed_expiry_leaves_count_untouched() {
        let _t = test_util::serialize();
        let (t1, _t2, _t3) = test_util::spawn_three();
        let sem = Semaphore::new(0);
        let key = &sem as *const Semaphore as usize;

        test_util::park(t1, key, "sem_wait", 40, None);
        time::advance_ms(40);
        genwait::check_timeouts(time::now_ms());

        assert_eq!(
            scheduler::wait_result_of(t1),
            Some(Err(ThreadError::TimedOut))
        );
        assert_eq!(sem.count(), 0);

        // A later signal has no stale waiter to consume it.
        sem.signal();
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn test_blocking_wait_rejected_inside_interrupt() {
        let _t = test_util::serialize();
        let sem = Semaphore::new(1);
        irq::enter_interrupt();
        let wait_r = sem.wait();
        let try_r = sem.try_wait();
        sem.signal();
        irq::leave_interrupt();
        assert_eq!(wait_r, Err(ThreadError::NotPermitted));
        assert_eq!(try_r, Ok(()));
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn test_destroy_busy_with_waiters() {
        let _t = test_util::serialize();
        let (t1, _t2, _t3) = test_util::spawn_three();
        let sem = Semaphore::new(0);
        let key = &sem as *const Semaphore as usize;
        test_util::park(t1, key, "sem_wait", 0, None);
        assert_eq!(sem.destroy(), Err(ThreadError::Busy));
        genwait::wake_all(key);
        assert_eq!(sem.destroy(), Ok(()));
    }
}
